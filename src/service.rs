//! The service model: what a host announces, and the records it becomes
//! authoritative for.

use crate::dns::valid_label;
use crate::errors::Result;
use crate::resource::{Resource, SRV, TXT};
use crate::types::{Class, Record};
use crate::validation_error;
use regex::Regex;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::time::Duration;

lazy_static! {
    /// "_service._proto.domain" with proto one of tcp/udp, rfc6763
    /// section 7.
    static ref SERVICE_TYPE: Regex =
        Regex::new(r"^_[a-zA-Z0-9-]+\._(tcp|udp)\.[a-zA-Z0-9.]+$").unwrap();
}

/// TTL for the PTR/SRV/TXT records of a service.
pub const RECORD_TTL: Duration = Duration::from_secs(120);

/// TTL for the host address record.
pub const HOST_TTL: Duration = Duration::from_secs(4500);

/// A label is at most 63 bytes on the wire ([rfc1035] section 2.3.4).
///
/// [rfc1035]: https://datatracker.ietf.org/doc/html/rfc1035
pub const MAX_LABEL_LEN: usize = 63;

/// Total TXT rdata budget, per the [rfc6762] section 6.2 guidance on
/// keeping answers comfortably inside a single packet.
///
/// [rfc6762]: https://datatracker.ietf.org/doc/html/rfc6762
pub const MAX_TXT_LEN: usize = 1300;

/// Where a service currently is in its announcement lifecycle,
/// [rfc6762] sections 8-10.
///
/// [rfc6762]: https://datatracker.ietf.org/doc/html/rfc6762
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ServiceState {
    /// Known to the library but not yet on the wire.
    Unregistered,

    /// Querying for our own proposed records to smoke out conflicts. The
    /// counter is the probe round (1..=3).
    Probing(u8),

    /// Lost a probe tiebreak; a rename is pending.
    ConflictDetected,

    /// Broadcasting unsolicited responses (1..=2).
    Announcing(u8),

    /// Probing and announcing complete; answering queries.
    Established,

    /// Withdrawn; a zero-TTL goodbye has been sent.
    Goodbye,
}

/// A named service instance to announce on the local link.
///
/// # Examples
///
/// ```rust
/// use castdns::Service;
///
/// let mut service = Service::new(
///     "My Web Server",
///     "_http._tcp.local",
///     8080,
///     "myhost.local",
///     [192, 168, 1, 100].into(),
/// );
/// service.txt.insert("path".to_string(), "/".to_string());
///
/// assert_eq!(service.service_id(), "My Web Server._http._tcp.local");
/// assert!(service.validate().is_ok());
/// ```
#[derive(Clone, Debug)]
pub struct Service {
    /// The user-visible instance name: one label, spaces and UTF-8 welcome
    /// ([rfc6763] section 4.3).
    ///
    /// [rfc6763]: https://datatracker.ietf.org/doc/html/rfc6763
    pub instance_name: String,

    /// The service type, of the form "_http._tcp.local".
    pub service_type: String,

    /// The TCP or UDP port the service listens on.
    pub port: u16,

    /// The host that provides the service, e.g. "myhost.local". May be
    /// left empty when registering through a responder, which then fills
    /// in its own configured hostname.
    pub hostname: String,

    /// The IPv4 address the hostname resolves to.
    pub address: Ipv4Addr,

    /// TXT metadata, serialized as "key=value" strings in key order.
    pub txt: BTreeMap<String, String>,

    /// Where this service is in its lifecycle.
    pub state: ServiceState,
}

impl Service {
    pub fn new(
        instance_name: &str,
        service_type: &str,
        port: u16,
        hostname: &str,
        address: Ipv4Addr,
    ) -> Service {
        Service {
            instance_name: instance_name.to_string(),
            service_type: service_type.to_string(),
            port,
            hostname: hostname.to_string(),
            address,
            txt: BTreeMap::new(),
            state: ServiceState::Unregistered,
        }
    }

    /// The full name this instance owns, "<instance>.<service_type>".
    pub fn service_id(&self) -> String {
        format!("{}.{}", self.instance_name, self.service_type)
    }

    /// Checks every field against the rules it must satisfy before the
    /// service may enter the registry.
    pub fn validate(&self) -> Result<()> {
        if self.instance_name.is_empty() {
            validation_error!("instance_name", self.instance_name, "must not be empty");
        }
        if self.instance_name.len() > MAX_LABEL_LEN {
            validation_error!(
                "instance_name",
                self.instance_name,
                "longer than {} bytes",
                MAX_LABEL_LEN
            );
        }
        // The instance name is a single label; a literal dot cannot be
        // represented in it.
        if self.instance_name.contains('.') {
            validation_error!("instance_name", self.instance_name, "may not contain '.'");
        }

        if !SERVICE_TYPE.is_match(&self.service_type) {
            validation_error!(
                "service_type",
                self.service_type,
                "must look like \"_service._tcp.local\" or \"_service._udp.local\""
            );
        }

        if self.port == 0 {
            validation_error!("port", self.port, "must be between 1 and 65535");
        }

        if !self.hostname.ends_with(".local") {
            validation_error!("hostname", self.hostname, "must end in \".local\"");
        }
        for label in self.hostname.split_terminator('.') {
            if label.is_empty() || label.len() > MAX_LABEL_LEN || !valid_label(label) {
                validation_error!("hostname", self.hostname, "invalid label {:?}", label);
            }
        }

        let mut txt_len = 0;
        for (key, value) in &self.txt {
            if key.is_empty() || key.contains('=') {
                validation_error!("txt", key, "keys must be non-empty and free of '='");
            }
            let entry = key.len() + 1 + value.len();
            if entry > 255 {
                validation_error!("txt", key, "entry longer than 255 bytes");
            }
            txt_len += 1 + entry;
        }
        if txt_len > MAX_TXT_LEN {
            validation_error!(
                "txt",
                format!("{} bytes", txt_len),
                "serialized TXT data larger than {} bytes",
                MAX_TXT_LEN
            );
        }

        Ok(())
    }

    /// The four records this service is authoritative for, in the canonical
    /// order used by announcements and responses: PTR, SRV, TXT, A. The PTR
    /// is shared, everything else is unique and carries the cache-flush
    /// bit.
    pub fn records(&self) -> Vec<Record> {
        let service_id = self.service_id();

        vec![
            Record {
                name: self.service_type.clone(),
                class: Class::Internet,
                cache_flush: false,
                ttl: RECORD_TTL,
                resource: Resource::PTR(service_id.clone()),
            },
            Record {
                name: service_id.clone(),
                class: Class::Internet,
                cache_flush: true,
                ttl: RECORD_TTL,
                resource: Resource::SRV(SRV {
                    priority: 0,
                    weight: 0,
                    port: self.port,
                    target: self.hostname.clone(),
                }),
            },
            Record {
                name: service_id,
                class: Class::Internet,
                cache_flush: true,
                ttl: RECORD_TTL,
                resource: Resource::TXT(self.txt_strings()),
            },
            Record {
                name: self.hostname.clone(),
                class: Class::Internet,
                cache_flush: true,
                ttl: HOST_TTL,
                resource: Resource::A(self.address),
            },
        ]
    }

    /// The unique records (SRV, TXT, A) this service must win probing for.
    /// The shared PTR is not probed.
    pub(crate) fn unique_records(&self) -> Vec<Record> {
        self.records().into_iter().filter(|r| r.cache_flush).collect()
    }

    /// Just the TXT record, used by in-place metadata updates.
    pub(crate) fn txt_record(&self) -> Record {
        Record {
            name: self.service_id(),
            class: Class::Internet,
            cache_flush: true,
            ttl: RECORD_TTL,
            resource: Resource::TXT(self.txt_strings()),
        }
    }

    fn txt_strings(&self) -> TXT {
        TXT(self
            .txt
            .iter()
            .map(|(k, v)| format!("{}={}", k, v).into_bytes())
            .collect())
    }
}

/// Picks the next instance name after a conflict, [rfc6762] section 9: a
/// trailing "-N" (N >= 2) increments, anything else gets "-2" appended. The
/// base text is truncated if needed so the label stays within 63 bytes.
///
/// [rfc6762]: https://datatracker.ietf.org/doc/html/rfc6762
pub(crate) fn next_instance_name(name: &str) -> String {
    let (base, n) = match name.rfind('-') {
        Some(i) => match name[i + 1..].parse::<u32>() {
            Ok(n) if n >= 2 => (&name[..i], n + 1),
            _ => (name, 2),
        },
        None => (name, 2),
    };

    let suffix = format!("-{}", n);
    let mut base = base.to_string();
    while base.len() + suffix.len() > MAX_LABEL_LEN {
        base.pop();
    }

    base + &suffix
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Error;
    use crate::types::Type;
    use pretty_assertions::assert_eq;

    fn service() -> Service {
        Service::new(
            "My Service",
            "_http._tcp.local",
            8080,
            "myhost.local",
            Ipv4Addr::new(192, 168, 1, 100),
        )
    }

    #[test]
    fn test_validate() {
        assert!(service().validate().is_ok());

        let mut s = service();
        s.instance_name = String::new();
        assert!(matches!(s.validate(), Err(Error::Validation { field: "instance_name", .. })));

        let mut s = service();
        s.instance_name = "a".repeat(64);
        assert!(s.validate().is_err());

        let mut s = service();
        s.instance_name = "dotted.name".to_string();
        assert!(s.validate().is_err());

        let mut s = service();
        s.service_type = "_http._tls.local".to_string();
        assert!(matches!(s.validate(), Err(Error::Validation { field: "service_type", .. })));

        let mut s = service();
        s.port = 0;
        assert!(matches!(s.validate(), Err(Error::Validation { field: "port", .. })));

        let mut s = service();
        s.hostname = "myhost.example.com".to_string();
        assert!(s.validate().is_err());

        let mut s = service();
        s.txt.insert("k".to_string(), "v".repeat(1400));
        assert!(matches!(s.validate(), Err(Error::Validation { field: "txt", .. })));

        let mut s = service();
        for i in 0..10 {
            s.txt.insert(format!("key{}", i), "v".repeat(200));
        }
        assert!(matches!(s.validate(), Err(Error::Validation { field: "txt", .. })));
    }

    #[test]
    fn test_records() {
        let mut s = service();
        s.txt.insert("path".to_string(), "/".to_string());

        let records = s.records();
        assert_eq!(records.len(), 4);

        let kinds: Vec<(Type, &str, bool, u64)> = records
            .iter()
            .map(|r| (r.r#type(), r.name.as_str(), r.cache_flush, r.ttl.as_secs()))
            .collect();
        assert_eq!(
            kinds,
            vec![
                (Type::PTR, "_http._tcp.local", false, 120),
                (Type::SRV, "My Service._http._tcp.local", true, 120),
                (Type::TXT, "My Service._http._tcp.local", true, 120),
                (Type::A, "myhost.local", true, 4500),
            ]
        );

        assert_eq!(
            records[2].resource.rdata().unwrap(),
            b"\x06path=/".to_vec()
        );
    }

    #[test]
    fn test_next_instance_name() {
        assert_eq!(next_instance_name("Printer"), "Printer-2");
        assert_eq!(next_instance_name("Printer-2"), "Printer-3");
        assert_eq!(next_instance_name("Printer-10"), "Printer-11");

        // "-1" is not a rename suffix.
        assert_eq!(next_instance_name("Printer-1"), "Printer-1-2");

        // Non-numeric tails are kept whole.
        assert_eq!(next_instance_name("My-Printer"), "My-Printer-2");

        // The base shrinks so the label stays within 63 bytes.
        let long = "x".repeat(63);
        let renamed = next_instance_name(&long);
        assert_eq!(renamed.len(), 63);
        assert!(renamed.ends_with("-2"));
    }
}
