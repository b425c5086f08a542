//! Multicast rate limiting ([rfc6762] section 6.2) and known-answer
//! suppression ([rfc6762] section 7.1).
//!
//! [rfc6762]: https://datatracker.ietf.org/doc/html/rfc6762

use crate::errors::Result;
use crate::types::Record;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// A given record may be multicast on a given interface at most once a
/// second.
pub const MULTICAST_INTERVAL: Duration = Duration::from_secs(1);

/// The sole exception: defending a record against a probe may happen after
/// only 250ms.
pub const PROBE_DEFENSE_INTERVAL: Duration = Duration::from_millis(250);

/// Identity of a record for rate-limiting purposes: name (case folded),
/// type, class and rdata. The cache-flush bit is deliberately absent - it
/// is not part of the record's identity.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Fingerprint {
    name: String,
    r#type: u16,
    class: u16,
    rdata: Vec<u8>,
}

impl Fingerprint {
    pub fn of(record: &Record) -> Result<Fingerprint> {
        Ok(Fingerprint {
            name: record.name.to_lowercase(),
            r#type: record.r#type() as u16,
            class: record.class as u16,
            rdata: record.resource.rdata()?,
        })
    }
}

/// Tracks, per record fingerprint and per interface, when the record was
/// last multicast.
#[derive(Default)]
pub struct RateLimiter {
    sent: Mutex<HashMap<(Fingerprint, String), Instant>>,
}

impl RateLimiter {
    pub fn new() -> RateLimiter {
        RateLimiter::default()
    }

    /// Stamps the fingerprint as multicast now. Call after the send
    /// completes, never before.
    pub fn record_multicast(&self, fingerprint: &Fingerprint, interface: &str) {
        self.sent
            .lock()
            .unwrap()
            .insert((fingerprint.clone(), interface.to_string()), Instant::now());
    }

    /// Whether the record may be multicast on this interface again.
    pub fn can_multicast(&self, fingerprint: &Fingerprint, interface: &str) -> bool {
        self.check(fingerprint, interface, MULTICAST_INTERVAL)
    }

    /// Whether the record may be multicast to defend against a probe, the
    /// one case allowed to run faster than once a second.
    pub fn can_probe_defend(&self, fingerprint: &Fingerprint, interface: &str) -> bool {
        self.check(fingerprint, interface, PROBE_DEFENSE_INTERVAL)
    }

    /// How long ago the record was last multicast on this interface, if
    /// ever. Drives the unicast-response decision for QU questions.
    pub fn last_multicast_age(&self, fingerprint: &Fingerprint, interface: &str) -> Option<Duration> {
        self.sent
            .lock()
            .unwrap()
            .get(&(fingerprint.clone(), interface.to_string()))
            .map(|at| at.elapsed())
    }

    fn check(&self, fingerprint: &Fingerprint, interface: &str, interval: Duration) -> bool {
        match self.last_multicast_age(fingerprint, interface) {
            Some(age) => age >= interval,
            None => true,
        }
    }
}

/// Drops the answers the querier already knows, [rfc6762] section 7.1: a
/// known answer whose remaining TTL is at least half of ours makes
/// repeating it pointless.
///
/// [rfc6762]: https://datatracker.ietf.org/doc/html/rfc6762
pub fn suppress_known_answers(answers: &mut Vec<Record>, known: &[Record]) {
    answers.retain(|answer| {
        !known.iter().any(|k| {
            k.name.eq_ignore_ascii_case(&answer.name)
                && k.class == answer.class
                && k.resource == answer.resource
                && k.ttl >= answer.ttl / 2
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::Resource;
    use crate::types::Class;
    use pretty_assertions::assert_eq;
    use std::net::Ipv4Addr;

    fn record(ip: [u8; 4]) -> Record {
        Record {
            name: "MyHost.local".to_string(),
            class: Class::Internet,
            cache_flush: true,
            ttl: Duration::from_secs(120),
            resource: Resource::A(Ipv4Addr::from(ip)),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_multicast_interval() {
        let limiter = RateLimiter::new();
        let fp = Fingerprint::of(&record([192, 168, 1, 100])).unwrap();

        assert!(limiter.can_multicast(&fp, "eth0"));
        limiter.record_multicast(&fp, "eth0");
        assert!(!limiter.can_multicast(&fp, "eth0"));

        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(!limiter.can_multicast(&fp, "eth0"));

        // A different interface is a different budget.
        assert!(limiter.can_multicast(&fp, "wlan0"));

        tokio::time::advance(Duration::from_millis(510)).await;
        assert!(limiter.can_multicast(&fp, "eth0"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_defense_interval() {
        let limiter = RateLimiter::new();
        let fp = Fingerprint::of(&record([192, 168, 1, 100])).unwrap();

        limiter.record_multicast(&fp, "eth0");
        assert!(!limiter.can_probe_defend(&fp, "eth0"));

        tokio::time::advance(Duration::from_millis(250)).await;
        assert!(limiter.can_probe_defend(&fp, "eth0"));
        assert!(!limiter.can_multicast(&fp, "eth0"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fingerprint_case_and_cache_flush() {
        let limiter = RateLimiter::new();
        limiter
            .record_multicast(&Fingerprint::of(&record([192, 168, 1, 100])).unwrap(), "eth0");

        // Same record, lowercased name and no cache-flush bit: same
        // fingerprint.
        let mut other = record([192, 168, 1, 100]);
        other.name = "myhost.local".to_string();
        other.cache_flush = false;
        let fp = Fingerprint::of(&other).unwrap();
        assert!(!limiter.can_multicast(&fp, "eth0"));

        // Different rdata: different fingerprint.
        let fp = Fingerprint::of(&record([192, 168, 1, 101])).unwrap();
        assert!(limiter.can_multicast(&fp, "eth0"));
    }

    #[test]
    fn test_suppress_known_answers() {
        let ours = record([192, 168, 1, 100]);

        let mut half = ours.clone();
        half.ttl = Duration::from_secs(60);
        let mut answers = vec![ours.clone()];
        suppress_known_answers(&mut answers, &[half]);
        assert_eq!(answers, vec![]);

        // 49% of the TTL is not enough to suppress.
        let mut low = ours.clone();
        low.ttl = Duration::from_secs(58);
        let mut answers = vec![ours.clone()];
        suppress_known_answers(&mut answers, &[low]);
        assert_eq!(answers.len(), 1);

        // Different rdata never suppresses.
        let other = record([192, 168, 1, 101]);
        let mut answers = vec![ours];
        suppress_known_answers(&mut answers, &[other]);
        assert_eq!(answers.len(), 1);
    }
}
