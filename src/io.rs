//! Various traits to help parsing of DNS messages.

use crate::errors::{Error, Result};
use crate::types::{Class, Type, CLASS_MASK, CLASS_TOP_BIT};
use crate::wire_error;
use byteorder::{ReadBytesExt, BE};
use num_traits::FromPrimitive;
use std::convert::TryInto;
use std::io;
use std::io::Cursor;
use std::io::SeekFrom;

/// Maximum length of a name on the wire, including length bytes and the
/// terminating zero. [rfc1035] section 3.1.
///
/// [rfc1035]: https://datatracker.ietf.org/doc/html/rfc1035
pub const MAX_NAME_LEN: usize = 255;

/// Compression pointer chains longer than this abort the parse. Generous
/// enough for any real message, small enough to defeat pointer loops.
const MAX_POINTER_JUMPS: u32 = 256;

pub trait SeekExt: io::Seek {
    /// Returns the number of bytes remaining to be consumed.
    /// This is used as a way to check for malformed input.
    fn remaining(&mut self) -> io::Result<u64> {
        let pos = self.stream_position()?;
        let len = self.seek(SeekFrom::End(0))?;

        // reset position
        self.seek(SeekFrom::Start(pos))?;

        Ok(len - pos)
    }
}

impl<'a> SeekExt for Cursor<&'a [u8]> {
    fn remaining(self: &mut std::io::Cursor<&'a [u8]>) -> io::Result<u64> {
        let pos = self.position() as usize;
        let len = self.get_ref().len() as usize;

        Ok((len - pos).try_into().unwrap())
    }
}

/// All types that implement `Read` and `Seek` get methods defined
/// in `DNSReadExt` for free.
impl<R: io::Read + ?Sized + io::Seek> DNSReadExt for R {}

/// Extensions to io::Read to add some DNS specific types.
pub trait DNSReadExt: io::Read + io::Seek {
    /// Reads a name from a byte array, decompressing [rfc1035] section 4.1.4
    /// pointers along the way, and returns it as a dotted string.
    ///
    /// Multicast DNS names are plain UTF-8 ([rfc6762] section 16), so labels
    /// are validated as UTF-8 and nothing more.
    ///
    /// # Errors
    ///
    /// Returns a [`Error::WireFormat`] if a label is not UTF-8, the name
    /// exceeds 255 bytes, a compression pointer does not point strictly
    /// backwards, or a pointer chain exceeds 256 jumps.
    ///
    /// [rfc1035]: https://datatracker.ietf.org/doc/html/rfc1035
    /// [rfc6762]: https://datatracker.ietf.org/doc/html/rfc6762
    fn read_qname(&mut self) -> Result<String> {
        let mut qname = String::new();
        let mut jumps = 0;
        let mut wire_len = 1; // the terminating zero byte
        let mut return_to = None;

        // Read each label one at a time, to build up the full name.
        loop {
            let pos = self.stream_position().map_err(|e| Error::wire("read name", 0, e))?;
            let len = self
                .read_u8()
                .map_err(|e| Error::wire("read name", pos, e))?;

            if len == 0 {
                break;
            }

            match len & 0xC0 {
                // No compression
                0x00 => {
                    wire_len += 1 + len as usize;
                    if wire_len > MAX_NAME_LEN {
                        wire_error!("read name", pos, "name longer than {} bytes", MAX_NAME_LEN);
                    }

                    let mut label = vec![0; len.into()];
                    self.read_exact(&mut label)
                        .map_err(|e| Error::wire("read name", pos, e))?;

                    let label = match String::from_utf8(label) {
                        Err(e) => wire_error!("read name", pos, "invalid label: {}", e),
                        Ok(s) => s,
                    };

                    if !qname.is_empty() {
                        qname.push('.');
                    }
                    qname.push_str(&label);
                }

                // Compression
                0xC0 => {
                    // Read the 14 bit pointer.
                    let b2 = self
                        .read_u8()
                        .map_err(|e| Error::wire("read name", pos, e))?;
                    let ptr = (len as u64 & !0xC0) << 8 | b2 as u64;

                    // Pointers may only point to earlier bytes.
                    if ptr >= pos {
                        wire_error!(
                            "read name",
                            pos,
                            "compression pointer to offset {} does not point backwards",
                            ptr
                        );
                    }

                    jumps += 1;
                    if jumps > MAX_POINTER_JUMPS {
                        wire_error!(
                            "read name",
                            pos,
                            "more than {} compression jumps",
                            MAX_POINTER_JUMPS
                        );
                    }

                    // The name continues elsewhere; remember where the
                    // record resumes the first time we leave it.
                    if return_to.is_none() {
                        return_to = Some(pos + 2);
                    }

                    self.seek(SeekFrom::Start(ptr))
                        .map_err(|e| Error::wire("read name", pos, e))?;
                }

                // Unknown
                _ => wire_error!(
                    "read name",
                    pos,
                    "unsupported label type {0:b}",
                    len & 0xC0
                ),
            }
        }

        if let Some(ret) = return_to {
            self.seek(SeekFrom::Start(ret))
                .map_err(|e| Error::wire("read name", ret, e))?;
        }

        if qname.is_empty() {
            qname.push('.'); // Root domain
        }

        Ok(qname)
    }

    /// Reads a DNS Type.
    fn read_type(&mut self) -> Result<Type> {
        let pos = self.stream_position().map_err(|e| Error::wire("read type", 0, e))?;
        let r#type = self
            .read_u16::<BE>()
            .map_err(|e| Error::wire("read type", pos, e))?;

        match FromPrimitive::from_u16(r#type) {
            Some(t) => Ok(t),
            None => wire_error!("read type", pos, "unsupported Type({})", r#type),
        }
    }

    /// Reads a DNS Class, splitting off the top bit (cache-flush on records,
    /// unicast-response on questions).
    fn read_class(&mut self) -> Result<(Class, bool)> {
        let pos = self.stream_position().map_err(|e| Error::wire("read class", 0, e))?;
        let class = self
            .read_u16::<BE>()
            .map_err(|e| Error::wire("read class", pos, e))?;

        let top_bit = class & CLASS_TOP_BIT != 0;
        match FromPrimitive::from_u16(class & CLASS_MASK) {
            Some(c) => Ok((c, top_bit)),
            None => wire_error!("read class", pos, "unsupported Class({})", class & CLASS_MASK),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn qname(buf: &[u8]) -> Result<String> {
        Cursor::new(buf).read_qname()
    }

    #[test]
    fn test_read_qname() {
        assert_eq!(qname(b"\x00").unwrap(), ".");
        assert_eq!(qname(b"\x04test\x05local\x00").unwrap(), "test.local");

        // A single UTF-8 instance label ("My Café ☕" is 12 bytes).
        assert_eq!(
            qname("\x0cMy Caf\u{00e9} \u{2615}\x00".as_bytes()).unwrap(),
            "My Café ☕"
        );
    }

    #[test]
    fn test_read_qname_compressed() {
        // "test.local" at offset 0, then a name "printer" + pointer to
        // offset 5 ("local").
        let buf = b"\x04test\x05local\x00\x07printer\xC0\x05";
        let mut cur = Cursor::new(&buf[..]);
        assert_eq!(cur.read_qname().unwrap(), "test.local");

        cur.set_position(12);
        assert_eq!(cur.read_qname().unwrap(), "printer.local");
        assert_eq!(cur.position(), buf.len() as u64);
    }

    #[test]
    fn test_read_qname_forward_pointer() {
        // A pointer at offset 0 to offset 0 (equal), and one pointing past
        // itself. Both must fail.
        assert!(matches!(
            qname(b"\xC0\x00"),
            Err(Error::WireFormat { .. })
        ));
        assert!(matches!(
            qname(b"\xC0\x05\x00\x00\x00\x01a\x00"),
            Err(Error::WireFormat { .. })
        ));
    }

    #[test]
    fn test_read_qname_jump_budget() {
        // A chain of 300 pointers, each pointing two bytes backwards. Every
        // single jump is legal, but the chain as a whole exceeds the jump
        // budget and must abort in bounded time.
        let mut buf = vec![0u8];
        buf.push(0); // padding so pointers sit at even offsets
        for i in 1..300u16 {
            let target = 2 * (i - 1);
            buf.push(0xC0 | (target >> 8) as u8);
            buf.push(target as u8);
        }
        let mut cur = Cursor::new(&buf[..]);
        cur.set_position(2 * 299);
        let err = cur.read_qname().unwrap_err();
        assert!(matches!(err, Error::WireFormat { .. }), "{}", err);
    }

    #[test]
    fn test_read_qname_label_loop() {
        // A label that walks forward onto its own pointer. The pointer is
        // always backwards, so only the name-length/jump caps stop it.
        let buf = b"\x07aaaaaaa\xC0\x00";
        let mut cur = Cursor::new(&buf[..]);
        cur.set_position(8);
        let err = cur.read_qname().unwrap_err();
        assert!(matches!(err, Error::WireFormat { .. }), "{}", err);
    }

    #[test]
    fn test_read_qname_too_long() {
        // 5 labels of 63 bytes = 320 bytes on the wire, over the 255 cap.
        let mut buf = Vec::new();
        for _ in 0..5 {
            buf.push(63);
            buf.extend_from_slice(&[b'a'; 63]);
        }
        buf.push(0);
        assert!(matches!(qname(&buf), Err(Error::WireFormat { .. })));
    }

    #[test]
    fn test_read_qname_truncated() {
        assert!(matches!(qname(b"\x04te"), Err(Error::WireFormat { .. })));
        assert!(matches!(qname(b"\x04test"), Err(Error::WireFormat { .. })));
    }

    #[test]
    fn test_read_class_top_bit() {
        let mut cur = Cursor::new(&b"\x00\x01\x80\x01"[..]);
        assert_eq!(cur.read_class().unwrap(), (Class::Internet, false));
        assert_eq!(cur.read_class().unwrap(), (Class::Internet, true));
    }
}
