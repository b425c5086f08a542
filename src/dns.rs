use crate::errors::{Error, Result};
use crate::io::{DNSReadExt, SeekExt, MAX_NAME_LEN};
use crate::types::*;
use crate::wire_error;
use byteorder::{ReadBytesExt, BE};
use num_traits::FromPrimitive;
use std::io::Cursor;

/// Size of the fixed message header, [rfc1035] section 4.1.1.
///
/// [rfc1035]: https://datatracker.ietf.org/doc/html/rfc1035
pub const HEADER_LEN: usize = 12;

#[derive(Copy, Clone, PartialEq)]
enum RecordSection {
    Answers,
    Authorities,
    Additionals,
}

/// A helper class to hold state while the parsing is happening.
pub(crate) struct MessageParser<'a> {
    cur: Cursor<&'a [u8]>,

    m: Message,
}

impl<'a> MessageParser<'a> {
    fn new(buf: &[u8]) -> MessageParser {
        MessageParser {
            cur: Cursor::new(buf),
            m: Message::default(),
        }
    }

    /// Consume the [`MessageParser`] and returned the resulting Message.
    fn parse(mut self) -> Result<Message> {
        if self.cur.get_ref().len() < HEADER_LEN {
            wire_error!(
                "parse header",
                0,
                "message shorter than the {} byte header",
                HEADER_LEN
            );
        }

        self.m.id = self.read_u16("parse header")?;

        let b = self.read_u8("parse header")?;
        self.m.qr = QR::from_bool(0b1000_0000 & b != 0);
        let opcode = (0b0111_1000 & b) >> 3;
        self.m.aa = (0b0000_0100 & b) != 0;
        self.m.tc = (0b0000_0010 & b) != 0;
        self.m.rd = (0b0000_0001 & b) != 0;

        self.m.opcode = match FromPrimitive::from_u8(opcode) {
            Some(t) => t,
            None => wire_error!("parse header", 2, "invalid Opcode({})", opcode),
        };

        let b = self.read_u8("parse header")?;
        self.m.ra = (0b1000_0000 & b) != 0;
        self.m.z = (0b0100_0000 & b) != 0; // Unused
        self.m.ad = (0b0010_0000 & b) != 0;
        self.m.cd = (0b0001_0000 & b) != 0;
        let rcode = 0b0000_1111 & b;

        self.m.rcode = match FromPrimitive::from_u8(rcode) {
            Some(t) => t,
            None => wire_error!("parse header", 3, "invalid RCode({})", rcode),
        };

        let qd_count = self.read_u16("parse header")?;
        let an_count = self.read_u16("parse header")?;
        let ns_count = self.read_u16("parse header")?;
        let ar_count = self.read_u16("parse header")?;

        self.read_questions(qd_count)?;
        self.read_records(an_count, RecordSection::Answers)?;
        self.read_records(ns_count, RecordSection::Authorities)?;
        self.read_records(ar_count, RecordSection::Additionals)?;

        let remaining = self
            .cur
            .remaining()
            .map_err(|e| Error::wire("parse message", self.cur.position(), e))?;
        if remaining > 0 {
            wire_error!(
                "parse message",
                self.cur.position(),
                "finished parsing with {} bytes left over",
                remaining
            );
        }

        Ok(self.m)
    }

    fn read_u8(&mut self, op: &'static str) -> Result<u8> {
        let pos = self.cur.position();
        self.cur.read_u8().map_err(|e| Error::wire(op, pos, e))
    }

    fn read_u16(&mut self, op: &'static str) -> Result<u16> {
        let pos = self.cur.position();
        self.cur
            .read_u16::<BE>()
            .map_err(|e| Error::wire(op, pos, e))
    }

    fn read_questions(&mut self, count: u16) -> Result<()> {
        self.m.questions.reserve_exact(count.into());

        for _ in 0..count {
            let name = self.cur.read_qname()?;
            let r#type = self.cur.read_type()?;
            let (class, unicast_response) = self.cur.read_class()?;

            self.m.questions.push(Question {
                name,
                r#type,
                class,
                unicast_response,
            });
        }

        Ok(())
    }

    fn read_records(&mut self, count: u16, section: RecordSection) -> Result<()> {
        let records = match section {
            RecordSection::Answers => &mut self.m.answers,
            RecordSection::Authorities => &mut self.m.authoritys,
            RecordSection::Additionals => &mut self.m.additionals,
        };
        records.reserve_exact(count.into());

        for _ in 0..count {
            let name = self.cur.read_qname()?;
            let r#type = self.cur.read_type()?;
            let (class, cache_flush) = self.cur.read_class()?;
            let record = Record::parse(&mut self.cur, name, r#type, class, cache_flush)?;

            let records = match section {
                RecordSection::Answers => &mut self.m.answers,
                RecordSection::Authorities => &mut self.m.authoritys,
                RecordSection::Additionals => &mut self.m.additionals,
            };
            records.push(record);
        }

        Ok(())
    }
}

impl Message {
    /// Decodes the supplied buffer and returns a [`Message`].
    pub fn from_slice(buf: &[u8]) -> Result<Message> {
        MessageParser::new(buf).parse()
    }

    /// Encodes this DNS [`Message`] as a [`Vec<u8>`] ready to be sent, as
    /// defined by [rfc1035]. Names are never compressed on output.
    ///
    /// [rfc1035]: https://datatracker.ietf.org/doc/html/rfc1035
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        let mut req = Vec::<u8>::with_capacity(512);

        req.extend_from_slice(&self.id.to_be_bytes());

        let mut b = 0_u8;
        b |= if self.qr.to_bool() { 0b1000_0000 } else { 0 };
        b |= ((self.opcode as u8) << 3) & 0b0111_1000;
        b |= if self.aa { 0b0000_0100 } else { 0 };
        b |= if self.tc { 0b0000_0010 } else { 0 };
        b |= if self.rd { 0b0000_0001 } else { 0 };
        req.push(b);

        let mut b = 0_u8;
        b |= if self.ra { 0b1000_0000 } else { 0 };
        b |= if self.z { 0b0100_0000 } else { 0 };
        b |= if self.ad { 0b0010_0000 } else { 0 };
        b |= if self.cd { 0b0001_0000 } else { 0 };
        b |= (self.rcode as u8) & 0b0000_1111;
        req.push(b);

        req.extend_from_slice(&(self.questions.len() as u16).to_be_bytes());
        req.extend_from_slice(&(self.answers.len() as u16).to_be_bytes());
        req.extend_from_slice(&(self.authoritys.len() as u16).to_be_bytes());
        req.extend_from_slice(&(self.additionals.len() as u16).to_be_bytes());

        for question in &self.questions {
            write_qname(&mut req, &question.name)?;

            let mut class = question.class as u16;
            if question.unicast_response {
                class |= CLASS_TOP_BIT;
            }

            req.extend_from_slice(&(question.r#type as u16).to_be_bytes());
            req.extend_from_slice(&class.to_be_bytes());
        }

        for record in self
            .answers
            .iter()
            .chain(self.authoritys.iter())
            .chain(self.additionals.iter())
        {
            write_record(&mut req, record)?;
        }

        Ok(req)
    }
}

fn write_record(buf: &mut Vec<u8>, record: &Record) -> Result<()> {
    write_qname(buf, &record.name)?;

    let mut class = record.class as u16;
    if record.cache_flush {
        class |= CLASS_TOP_BIT;
    }

    buf.extend_from_slice(&(record.r#type() as u16).to_be_bytes());
    buf.extend_from_slice(&class.to_be_bytes());
    buf.extend_from_slice(&(record.ttl.as_secs() as u32).to_be_bytes());

    let rdata = record.resource.rdata()?;
    buf.extend_from_slice(&(rdata.len() as u16).to_be_bytes());
    buf.extend_from_slice(&rdata);

    Ok(())
}

/// Writes a name into the supplied [`Vec<u8>`] as length-prefixed labels.
///
/// The first label is written as-is, because a DNS-SD service instance name
/// is a single user-visible label that may contain spaces and any UTF-8
/// ([rfc6763] section 4.3). Every other label gets the conventional
/// hostname character rules.
///
/// [rfc6763]: https://datatracker.ietf.org/doc/html/rfc6763
pub(crate) fn write_qname(buf: &mut Vec<u8>, domain: &str) -> Result<()> {
    let mut wire_len = 1; // the terminating zero byte

    if !domain.is_empty() && domain != "." {
        for (i, label) in domain.split_terminator('.').enumerate() {
            if label.is_empty() {
                wire_error!(
                    "write name",
                    buf.len(),
                    "empty label in name '{}'",
                    domain
                );
            }

            if label.len() > 63 {
                wire_error!(
                    "write name",
                    buf.len(),
                    "label '{0}' longer than 63 bytes",
                    label
                );
            }

            if i > 0 && !valid_label(label) {
                wire_error!(
                    "write name",
                    buf.len(),
                    "label '{0}' in name '{1}' contains invalid characters",
                    label,
                    domain
                );
            }

            wire_len += 1 + label.len();
            if wire_len > MAX_NAME_LEN {
                wire_error!(
                    "write name",
                    buf.len(),
                    "name '{}' longer than {} bytes",
                    domain,
                    MAX_NAME_LEN
                );
            }

            // Write the length.
            buf.push(label.len() as u8);

            // Then the actual label.
            buf.extend_from_slice(label.as_bytes());
        }
    }

    buf.push(0);

    Ok(())
}

/// Hostname-ish label rules: `[A-Za-z0-9_-]`, no leading or trailing `-`.
pub(crate) fn valid_label(label: &str) -> bool {
    !label.starts_with('-')
        && !label.ends_with('-')
        && label
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
