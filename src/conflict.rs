//! Simultaneous-probe tiebreaking, [rfc6762] section 8.2.
//!
//! When two responders probe for the same name at the same time, both back
//! off or neither would; the RFC instead imposes a total order on records
//! (class, then type, then raw rdata bytes) and the lexicographically later
//! one wins.
//!
//! [rfc6762]: https://datatracker.ietf.org/doc/html/rfc6762

use crate::errors::Result;
use crate::types::Record;
use std::cmp::Ordering;

/// The outcome of comparing our proposed record against one received while
/// probing.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Tiebreak {
    /// Our record orders later; the other responder must back off.
    Win,

    /// Their record orders later; we rename.
    Lose,

    /// The records are identical (or unrelated). Not a conflict - two
    /// responders probing for the very same data tolerate each other.
    Tie,
}

/// Compares two records per [rfc6762] section 8.2. Pure, no shared state.
///
/// The rdata comparison treats bytes as unsigned 0-255 values, and a record
/// whose rdata is a strict prefix of the other's loses to it.
///
/// [rfc6762]: https://datatracker.ietf.org/doc/html/rfc6762
pub fn tiebreak(ours: &Record, theirs: &Record) -> Result<Tiebreak> {
    // Records for different names are unrelated.
    if !ours.name.eq_ignore_ascii_case(&theirs.name) {
        return Ok(Tiebreak::Tie);
    }

    // Compare the class with the cache-flush bit masked off; our model
    // already carries that bit out-of-band.
    match (ours.class as u16).cmp(&(theirs.class as u16)) {
        Ordering::Greater => return Ok(Tiebreak::Win),
        Ordering::Less => return Ok(Tiebreak::Lose),
        Ordering::Equal => {}
    }

    match (ours.r#type() as u16).cmp(&(theirs.r#type() as u16)) {
        Ordering::Greater => return Ok(Tiebreak::Win),
        Ordering::Less => return Ok(Tiebreak::Lose),
        Ordering::Equal => {}
    }

    // Byte-wise unsigned comparison; &[u8] already orders a strict prefix
    // before the longer value.
    let ours_rdata = ours.resource.rdata()?;
    let theirs_rdata = theirs.resource.rdata()?;

    Ok(match ours_rdata.cmp(&theirs_rdata) {
        Ordering::Greater => Tiebreak::Win,
        Ordering::Less => Tiebreak::Lose,
        Ordering::Equal => Tiebreak::Tie,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{Resource, SRV, TXT};
    use crate::types::Class;
    use pretty_assertions::assert_eq;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    fn a_record(name: &str, ip: [u8; 4]) -> Record {
        Record {
            name: name.to_string(),
            class: Class::Internet,
            cache_flush: true,
            ttl: Duration::from_secs(4500),
            resource: Resource::A(Ipv4Addr::from(ip)),
        }
    }

    #[test]
    fn test_unsigned_rdata_comparison() {
        // 99 < 200 only when the bytes are compared unsigned; a signed
        // comparison would flip this outcome.
        let ours = a_record("myhost.local", [169, 254, 99, 200]);
        let theirs = a_record("myhost.local", [169, 254, 200, 50]);

        assert_eq!(tiebreak(&ours, &theirs).unwrap(), Tiebreak::Lose);
        assert_eq!(tiebreak(&theirs, &ours).unwrap(), Tiebreak::Win);
    }

    #[test]
    fn test_identical_records_tie() {
        let ours = a_record("myhost.local", [192, 168, 1, 100]);
        let mut theirs = a_record("MyHost.local", [192, 168, 1, 100]);

        // Same data under a case-folded name, with a different cache-flush
        // bit: still a tie.
        theirs.cache_flush = false;
        assert_eq!(tiebreak(&ours, &theirs).unwrap(), Tiebreak::Tie);
    }

    #[test]
    fn test_different_names_do_not_conflict() {
        let ours = a_record("myhost.local", [192, 168, 1, 100]);
        let theirs = a_record("otherhost.local", [192, 168, 1, 100]);
        assert_eq!(tiebreak(&ours, &theirs).unwrap(), Tiebreak::Tie);
    }

    #[test]
    fn test_type_ordering() {
        let srv = Record {
            name: "x._http._tcp.local".to_string(),
            class: Class::Internet,
            cache_flush: true,
            ttl: Duration::from_secs(120),
            resource: Resource::SRV(SRV {
                priority: 0,
                weight: 0,
                port: 80,
                target: "myhost.local".to_string(),
            }),
        };
        let txt = Record {
            name: "x._http._tcp.local".to_string(),
            class: Class::Internet,
            cache_flush: true,
            ttl: Duration::from_secs(120),
            resource: Resource::TXT(TXT(vec![b"a=b".to_vec()])),
        };

        // SRV (33) outranks TXT (16).
        assert_eq!(tiebreak(&srv, &txt).unwrap(), Tiebreak::Win);
        assert_eq!(tiebreak(&txt, &srv).unwrap(), Tiebreak::Lose);
    }

    #[test]
    fn test_prefix_loses() {
        let short = Record {
            name: "x._http._tcp.local".to_string(),
            class: Class::Internet,
            cache_flush: true,
            ttl: Duration::from_secs(120),
            resource: Resource::TXT(TXT(vec![b"a".to_vec()])),
        };
        let long = Record {
            name: "x._http._tcp.local".to_string(),
            class: Class::Internet,
            cache_flush: true,
            ttl: Duration::from_secs(120),
            resource: Resource::TXT(TXT(vec![b"a".to_vec(), b"b".to_vec()])),
        };

        assert_eq!(tiebreak(&short, &long).unwrap(), Tiebreak::Lose);
        assert_eq!(tiebreak(&long, &short).unwrap(), Tiebreak::Win);
    }
}
