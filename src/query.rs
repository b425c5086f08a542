//! Turns incoming questions into response messages.

use crate::limiter::{suppress_known_answers, Fingerprint, RateLimiter};
use crate::registry::Registry;
use crate::service::{Service, ServiceState, RECORD_TTL};
use crate::types::{Class, Message, Question, Record, Type};
use crate::resource::Resource;
use log::debug;
use std::net::SocketAddr;

/// The DNS-SD service-type enumeration name, [rfc6763] section 9.
///
/// [rfc6763]: https://datatracker.ietf.org/doc/html/rfc6763
pub const SERVICE_TYPE_ENUMERATION: &str = "_services._dns-sd._udp.local";

/// A response ready to leave the responder.
pub(crate) struct Outbound {
    pub message: Message,

    /// `None` means the multicast group.
    pub dest: Option<SocketAddr>,

    /// Fingerprints to stamp in the rate limiter once the multicast send
    /// has completed. Empty for unicast replies.
    pub fingerprints: Vec<Fingerprint>,
}

/// Produces zero or one response per question in the query.
///
/// Faults in a single answer (and malformed questions) are logged and
/// skipped; this function never fails a whole query.
pub(crate) fn handle_query(
    query: &Message,
    src: SocketAddr,
    registry: &Registry,
    limiter: &RateLimiter,
    interface: &str,
) -> Vec<Outbound> {
    let mut out = Vec::new();

    // A query carrying proposed records is a competitor's probe; answering
    // it defends our names and may run on the faster 250ms budget
    // (rfc6762 section 6.2).
    let probe = !query.authoritys.is_empty();

    for question in &query.questions {
        if question.class != Class::Internet && question.class != Class::Any {
            continue;
        }

        let (mut answers, additionals) = answers_for(question, registry);

        suppress_known_answers(&mut answers, &query.answers);

        // Per-record multicast budget: drop what was sent within the last
        // second (or 250ms when defending a unique record against a
        // probe).
        answers.retain(|answer| match Fingerprint::of(answer) {
            Ok(fp) => {
                let ok = if probe && answer.cache_flush {
                    limiter.can_probe_defend(&fp, interface)
                } else {
                    limiter.can_multicast(&fp, interface)
                };
                if !ok {
                    debug!("rate limited {} {}", answer.name, answer.r#type());
                }
                ok
            }
            Err(e) => {
                debug!("skipping unencodable answer {}: {}", answer.name, e);
                false
            }
        });

        if answers.is_empty() {
            continue;
        }

        // A QU question gets a unicast reply only while every answer is
        // still fresh in the shared caches, i.e. was multicast within the
        // last quarter of its TTL. Otherwise multicast, so caches refresh.
        let unicast = question.unicast_response
            && answers.iter().all(|answer| match Fingerprint::of(answer) {
                Ok(fp) => matches!(
                    limiter.last_multicast_age(&fp, interface),
                    Some(age) if age < answer.ttl / 4
                ),
                Err(_) => false,
            });

        let mut message = Message::response();
        let mut fingerprints = Vec::new();

        if unicast {
            // Unicast replies echo the querier's id so it can match them.
            message.id = query.id;
        } else {
            for record in answers.iter().chain(additionals.iter()) {
                match Fingerprint::of(record) {
                    Ok(fp) => fingerprints.push(fp),
                    Err(e) => debug!("skipping fingerprint for {}: {}", record.name, e),
                }
            }
        }

        message.answers = answers;
        message.additionals = additionals;

        out.push(Outbound {
            message,
            dest: if unicast { Some(src) } else { None },
            fingerprints,
        });
    }

    out
}

/// Collects the answers (and the additionals that should ride along) for a
/// single question.
fn answers_for(question: &Question, registry: &Registry) -> (Vec<Record>, Vec<Record>) {
    let mut answers = Vec::new();
    let mut additionals = Vec::new();

    // The service-type enumeration is answered from the registry
    // projection, one shared PTR per distinct type.
    if question.name.eq_ignore_ascii_case(SERVICE_TYPE_ENUMERATION) {
        if question.r#type == Type::PTR || question.r#type == Type::ANY {
            for service_type in registry.service_types() {
                answers.push(Record {
                    name: SERVICE_TYPE_ENUMERATION.to_string(),
                    class: Class::Internet,
                    cache_flush: false,
                    ttl: RECORD_TTL,
                    resource: Resource::PTR(service_type),
                });
            }
        }
        return (answers, additionals);
    }

    for service in registry.snapshot() {
        // Only fully established services answer queries.
        if service.state != ServiceState::Established {
            continue;
        }

        for record in service.records() {
            if !record.name.eq_ignore_ascii_case(&question.name) {
                continue;
            }
            if question.r#type != Type::ANY && question.r#type != record.r#type() {
                continue;
            }

            // A PTR answer is useless without the records it points at, so
            // they travel in the additional section.
            if record.r#type() == Type::PTR {
                additionals.extend(unique_records(&service));
            }

            answers.push(record);
        }
    }

    // Anything already in the answer section has no business repeating in
    // the additionals.
    additionals.retain(|a| !answers.contains(a));

    (answers, additionals)
}

fn unique_records(service: &Service) -> Vec<Record> {
    service
        .records()
        .into_iter()
        .filter(|r| r.cache_flush)
        .collect()
}
