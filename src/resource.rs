//! Typed rdata for the four record types of DNS-Based Service Discovery.

use crate::dns::write_qname;
use crate::errors::{Error, Result};
use crate::io::DNSReadExt;
use crate::types::{Class, Record, Type};
use crate::wire_error;
use byteorder::{ReadBytesExt, BE};
use std::fmt;
use std::io::Cursor;
use std::io::Read;
use std::net::Ipv4Addr;
use std::time::Duration;

/// Recource Record Definitions.
///
/// Rdata lives here in typed form; raw bytes exist only at the wire
/// boundary ([`Resource::rdata`] and [`Record::parse`]).
#[allow(clippy::upper_case_acronyms)]
#[derive(Clone, Debug, PartialEq)]
pub enum Resource {
    A(Ipv4Addr),

    /// Shared pointer from a service type to an instance of it.
    PTR(String),

    TXT(TXT),
    SRV(SRV),
}

impl Resource {
    pub fn r#type(&self) -> Type {
        match self {
            Resource::A(_) => Type::A,
            Resource::PTR(_) => Type::PTR,
            Resource::TXT(_) => Type::TXT,
            Resource::SRV(_) => Type::SRV,
        }
    }

    /// Encodes the rdata as it appears on the wire. Names are never
    /// compressed, which keeps the encoding canonical; the [rfc6762]
    /// section 8.2 tiebreak compares exactly these bytes.
    ///
    /// [rfc6762]: https://datatracker.ietf.org/doc/html/rfc6762
    pub fn rdata(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();

        match self {
            Resource::A(ip) => buf.extend_from_slice(&ip.octets()),

            Resource::PTR(name) => write_qname(&mut buf, name)?,

            Resource::TXT(txt) => {
                if txt.0.is_empty() {
                    // An empty TXT record is a single zero byte, see
                    // rfc6763 section 6.1.
                    buf.push(0);
                } else {
                    for s in &txt.0 {
                        if s.len() > 255 {
                            wire_error!(
                                "write rdata",
                                buf.len(),
                                "TXT string longer than 255 bytes"
                            );
                        }
                        buf.push(s.len() as u8);
                        buf.extend_from_slice(s);
                    }
                }
            }

            Resource::SRV(srv) => {
                buf.extend_from_slice(&srv.priority.to_be_bytes());
                buf.extend_from_slice(&srv.weight.to_be_bytes());
                buf.extend_from_slice(&srv.port.to_be_bytes());
                write_qname(&mut buf, &srv.target)?;
            }
        }

        Ok(buf)
    }
}

// https://datatracker.ietf.org/doc/html/rfc2782
#[derive(Clone, Debug, PartialEq)]
pub struct SRV {
    pub priority: u16,
    pub weight: u16,
    pub port: u16,

    /// The host that provides the service.
    pub target: String,
}

impl fmt::Display for SRV {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        // "0 0 8080 myhost.local."
        write!(
            f,
            "{priority} {weight} {port} {target}.",
            priority = self.priority,
            weight = self.weight,
            port = self.port,
            target = self.target,
        )
    }
}

/// A TXT record is a sequence of strings, each up to 255 bytes. DNS-SD
/// stores `key=value` pairs in them.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TXT(pub Vec<Vec<u8>>);

impl fmt::Display for TXT {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let strings: Vec<String> = self
            .0
            .iter()
            .map(|s| format!("\"{}\"", String::from_utf8_lossy(s)))
            .collect();
        write!(f, "{}", strings.join(" "))
    }
}

impl Record {
    /// Parses the tail of a resource record (ttl, rdlength and rdata); the
    /// name, type and class were already consumed by the caller.
    pub(crate) fn parse(
        cur: &mut Cursor<&[u8]>,
        name: String,
        r#type: Type,
        class: Class,
        cache_flush: bool,
    ) -> Result<Record> {
        let pos = cur.position();
        let ttl = cur
            .read_u32::<BE>()
            .map_err(|e| Error::wire("parse record", pos, e))?;
        let rd_len = cur
            .read_u16::<BE>()
            .map_err(|e| Error::wire("parse record", pos, e))? as u64;

        let start = cur.position();
        let end = start + rd_len;
        if end > cur.get_ref().len() as u64 {
            wire_error!(
                "parse record",
                start,
                "rdlength {} overruns the message",
                rd_len
            );
        }

        let resource = Resource::parse(cur, r#type, start, rd_len)?;

        // A rdata whose inner fields stop short of rdlength is as malformed
        // as one that overruns it.
        if cur.position() != end {
            wire_error!(
                "parse record",
                cur.position(),
                "rdata length {} does not match rdlength {}",
                cur.position() - start,
                rd_len
            );
        }

        Ok(Record {
            name,
            class,
            cache_flush,
            ttl: Duration::from_secs(ttl.into()),
            resource,
        })
    }
}

impl Resource {
    fn parse(cur: &mut Cursor<&[u8]>, r#type: Type, start: u64, rd_len: u64) -> Result<Resource> {
        match r#type {
            Type::A => {
                if rd_len != 4 {
                    wire_error!(
                        "parse rdata",
                        start,
                        "invalid A record length ({}) expected 4",
                        rd_len
                    );
                }
                let mut octets = [0; 4];
                cur.read_exact(&mut octets)
                    .map_err(|e| Error::wire("parse rdata", start, e))?;
                Ok(Resource::A(Ipv4Addr::from(octets)))
            }

            Type::PTR => Ok(Resource::PTR(cur.read_qname()?)),

            Type::TXT => {
                let mut txts = Vec::new();
                let end = start + rd_len;

                // Empty rdata is a valid, empty TXT record.
                while cur.position() < end {
                    let pos = cur.position();
                    let len = cur
                        .read_u8()
                        .map_err(|e| Error::wire("parse rdata", pos, e))?
                        as u64;
                    if cur.position() + len > end {
                        wire_error!("parse rdata", pos, "TXT record too short");
                    }

                    let mut txt = vec![0; len as usize];
                    cur.read_exact(&mut txt)
                        .map_err(|e| Error::wire("parse rdata", pos, e))?;
                    txts.push(txt);
                }

                Ok(Resource::TXT(TXT(txts)))
            }

            Type::SRV => {
                if rd_len < 7 {
                    wire_error!("parse rdata", start, "SRV record too short");
                }
                let priority = cur
                    .read_u16::<BE>()
                    .map_err(|e| Error::wire("parse rdata", start, e))?;
                let weight = cur
                    .read_u16::<BE>()
                    .map_err(|e| Error::wire("parse rdata", start, e))?;
                let port = cur
                    .read_u16::<BE>()
                    .map_err(|e| Error::wire("parse rdata", start, e))?;
                let target = cur.read_qname()?;

                Ok(Resource::SRV(SRV {
                    priority,
                    weight,
                    port,
                    target,
                }))
            }

            Type::ANY => wire_error!("parse rdata", start, "ANY is not a record type"),
        }
    }
}
