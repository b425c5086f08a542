//! castdns is a multicast DNS ([rfc6762]) and DNS-Based Service Discovery
//! ([rfc6763]) responder library: embed it in an application to announce
//! and defend named services on the local link.
//!
//! # Features
//! * Full service lifecycle: probing, conflict tiebreaking, automatic
//!   renaming, announcing, query answering, and zero-TTL goodbyes.
//! * Parsing and generating the DNS-SD record types: PTR, SRV, TXT and A,
//!   with name compression handled on input (hardened against pointer
//!   loops) and the mDNS cache-flush/QU bits in both directions.
//! * Per-record per-interface multicast rate limiting and known-answer
//!   suppression.
//! * Service-type enumeration (`_services._dns-sd._udp.local`).
//! * A pluggable [`Transport`] so tests (and, later, IPv6) can substitute
//!   the IPv4 UDP implementation.
//!
//! # Usage
//!
//! ```no_run
//! use castdns::{Config, Responder, Service};
//!
//! #[tokio::main]
//! async fn main() -> castdns::Result<()> {
//!     // Bring up a responder on the default interface.
//!     let responder = Responder::new(Config {
//!         hostname: "myhost.local".to_string(),
//!         ..Default::default()
//!     })?;
//!
//!     // Describe the service to announce. The instance name is a single
//!     // free-form label; spaces and UTF-8 are fine. The empty hostname
//!     // inherits the responder's.
//!     let mut service = Service::new(
//!         "My Web Server",
//!         "_http._tcp.local",
//!         8080,
//!         "",
//!         [192, 168, 1, 100].into(),
//!     );
//!     service.txt.insert("path".to_string(), "/".to_string());
//!
//!     // Probing and announcing take roughly 1.75 seconds; if another
//!     // responder owns the name, this comes back with "My Web Server-2".
//!     let service_id = responder.register(service).await?;
//!     println!("announced as {}", service_id);
//!
//!     // ... the responder now answers queries in the background ...
//!
//!     // Withdrawing sends a goodbye so caches forget us promptly.
//!     responder.unregister(&service_id).await?;
//!     responder.close().await
//! }
//! ```
//!
//! # Testing
//!
//! ```shell
//! $ cargo test --all
//! ```
//!
//! The timing-sensitive behaviour (probe cadence, rate limiting, rename
//! backoff) is tested under tokio's paused clock, so the suite runs in
//! milliseconds of real time.
//!
//! ## Reference
//!
//! * [rfc1035]: DOMAIN NAMES - IMPLEMENTATION AND SPECIFICATION
//! * [rfc2782]: A DNS RR for specifying the location of services (DNS SRV)
//! * [rfc6762]: Multicast DNS
//! * [rfc6763]: DNS-Based Service Discovery
//!
//! [rfc1035]: https://datatracker.ietf.org/doc/html/rfc1035
//! [rfc2782]: https://datatracker.ietf.org/doc/html/rfc2782
//! [rfc6762]: https://datatracker.ietf.org/doc/html/rfc6762
//! [rfc6763]: https://datatracker.ietf.org/doc/html/rfc6763

pub mod conflict;
mod config;
mod display;
mod dns;
mod errors;
mod fsm;
mod io;
pub mod limiter;
mod query;
mod registry;
pub mod resource;
mod responder;
mod service;
pub mod transport;
pub mod types;
pub mod util;

#[macro_use]
extern crate num_derive;

#[macro_use]
extern crate lazy_static;

// Pull up the various types that should be on the front page of the docs.
#[doc(inline)]
pub use crate::types::*;

#[doc(inline)]
pub use crate::resource::*;

#[doc(inline)]
pub use crate::responder::Responder;

#[doc(inline)]
pub use crate::service::{Service, ServiceState};

#[doc(inline)]
pub use crate::transport::{Transport, UdpTransport};

pub use crate::config::Config;
pub use crate::errors::Error;
pub use crate::errors::Result;
pub use crate::fsm::Event;
pub use crate::query::SERVICE_TYPE_ENUMERATION;
