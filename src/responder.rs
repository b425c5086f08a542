//! The responder: owns the transport, the registry and the receive loop,
//! and runs one state machine per registered service.

use crate::config::Config;
use crate::errors::{Error, Result};
use crate::fsm::{Command, Event, ServiceFsm, CONFLICT_CHANNEL_CAPACITY};
use crate::limiter::RateLimiter;
use crate::query::handle_query;
use crate::registry::Registry;
use crate::service::Service;
use crate::transport::{allow_source, Transport, UdpTransport};
use crate::types::{Message, Opcode, Record};
use crate::util::hexdump;
use crate::validation_error;
use bytes::Bytes;
use log::{debug, info, trace, warn};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

/// Capacity of the lifecycle event channel; slow subscribers lag rather
/// than block the responder.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Capacity of a state machine's command channel.
const COMMAND_CHANNEL_CAPACITY: usize = 8;

/// An embeddable multicast DNS responder.
///
/// # Examples
///
/// ```no_run
/// use castdns::{Config, Responder, Service};
///
/// #[tokio::main]
/// async fn main() -> castdns::Result<()> {
///     let responder = Responder::new(Config {
///         hostname: "myhost.local".to_string(),
///         ..Default::default()
///     })?;
///
///     // An empty hostname inherits the responder's at registration.
///     let service = Service::new(
///         "My Web Server",
///         "_http._tcp.local",
///         8080,
///         "",
///         [192, 168, 1, 100].into(),
///     );
///
///     // Blocks through probing and announcing, roughly 1.75s.
///     let service_id = responder.register(service).await?;
///     println!("registered as {}", service_id);
///
///     // ... serve queries until shutdown ...
///
///     responder.close().await
/// }
/// ```
pub struct Responder {
    registry: Arc<Registry>,
    transport: Arc<dyn Transport>,
    limiter: Arc<RateLimiter>,
    fsms: Arc<Mutex<Vec<FsmHandle>>>,
    events: broadcast::Sender<Event>,
    shutdown: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    closed: AtomicBool,
    receive_task: Mutex<Option<JoinHandle<()>>>,
    interface: String,
    hostname: String,
}

/// The responder's side of one running state machine.
struct FsmHandle {
    /// The machine's current service id; renames during probing move it.
    shared_id: Arc<Mutex<String>>,
    commands: mpsc::Sender<Command>,
    conflicts: mpsc::Sender<Record>,
    task: JoinHandle<()>,
}

impl Responder {
    /// Opens the mDNS socket and starts the receive loop. Must be called
    /// from within a tokio runtime.
    pub fn new(config: Config) -> Result<Responder> {
        let transport = Arc::new(UdpTransport::new(&config)?);
        Ok(Responder::with_transport(config, transport))
    }

    /// Like [`Responder::new`], but over a caller-supplied transport. This
    /// is the seam test suites (and future IPv6 support) plug into.
    pub fn with_transport(config: Config, transport: Arc<dyn Transport>) -> Responder {
        let registry = Arc::new(Registry::new());
        let limiter = Arc::new(RateLimiter::new());
        let fsms = Arc::new(Mutex::new(Vec::new()));
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let interface = config.interface.to_string();
        let hostname = config.hostname.clone();

        let receive_task = tokio::spawn(receive_loop(
            Arc::clone(&transport),
            Arc::clone(&registry),
            Arc::clone(&limiter),
            Arc::clone(&fsms),
            config,
            interface.clone(),
            shutdown_rx.clone(),
        ));

        info!("responder up on interface {}", interface);

        Responder {
            registry,
            transport,
            limiter,
            fsms,
            events,
            shutdown,
            shutdown_rx,
            closed: AtomicBool::new(false),
            receive_task: Mutex::new(Some(receive_task)),
            interface,
            hostname,
        }
    }

    /// Announces a service and blocks until it is Established (roughly
    /// 1.75s when nobody objects), returning the final service id - which
    /// differs from the submitted one if conflicts forced a rename.
    pub async fn register(&self, mut service: Service) -> Result<String> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Shutdown);
        }

        // A service that names no host is provided by this one.
        if service.hostname.is_empty() {
            service.hostname = self.hostname.clone();
        }

        service.validate()?;
        let service_id = service.service_id();
        self.registry.insert(service)?;

        let (commands_tx, commands) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (conflicts_tx, conflicts) = mpsc::channel(CONFLICT_CHANNEL_CAPACITY);
        let (registered_tx, registered) = oneshot::channel();
        let shared_id = Arc::new(Mutex::new(service_id.clone()));

        let fsm = ServiceFsm {
            service_id,
            shared_id: Arc::clone(&shared_id),
            registry: Arc::clone(&self.registry),
            transport: Arc::clone(&self.transport),
            limiter: Arc::clone(&self.limiter),
            interface: self.interface.clone(),
            commands,
            conflicts,
            events: self.events.clone(),
            shutdown: self.shutdown_rx.clone(),
        };

        let task = tokio::spawn(fsm.run(registered_tx));
        self.fsms.lock().unwrap().push(FsmHandle {
            shared_id: Arc::clone(&shared_id),
            commands: commands_tx,
            conflicts: conflicts_tx,
            task,
        });

        let result = match registered.await {
            Ok(result) => result,
            Err(_) => Err(Error::Cancelled),
        };

        if result.is_err() {
            // The machine is gone; drop our side of it.
            self.fsms
                .lock()
                .unwrap()
                .retain(|h| !Arc::ptr_eq(&h.shared_id, &shared_id));
        }

        result
    }

    /// Withdraws a service: its state machine says goodbye, then the
    /// service leaves the registry.
    pub async fn unregister(&self, service_id: &str) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Shutdown);
        }

        let handle = match self.take_handle(service_id) {
            Some(h) => h,
            None => validation_error!("service_id", service_id, "not registered"),
        };

        let (done_tx, done) = oneshot::channel();
        let result = match handle.commands.send(Command::Unregister { done: done_tx }).await {
            Ok(()) => match done.await {
                Ok(result) => result,
                Err(_) => Err(Error::Cancelled),
            },
            // The machine already exited; there is nothing left to say
            // goodbye with.
            Err(_) => Ok(()),
        };

        self.registry.remove(service_id);
        let _ = handle.task.await;

        result
    }

    /// Replaces a service's TXT data without re-probing and announces the
    /// new record once ([rfc6762] section 8.4).
    ///
    /// [rfc6762]: https://datatracker.ietf.org/doc/html/rfc6762
    pub async fn update(&self, service_id: &str, txt: BTreeMap<String, String>) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Shutdown);
        }

        // Validate the new data against the full service before touching
        // anything.
        let mut service = match self.registry.get(service_id) {
            Some(s) => s,
            None => validation_error!("service_id", service_id, "not registered"),
        };
        service.txt = txt.clone();
        service.validate()?;

        let commands = {
            let fsms = self.fsms.lock().unwrap();
            match fsms
                .iter()
                .find(|h| h.shared_id.lock().unwrap().as_str() == service_id)
            {
                Some(h) => h.commands.clone(),
                None => validation_error!("service_id", service_id, "not registered"),
            }
        };

        let (done_tx, done) = oneshot::channel();
        if commands
            .send(Command::UpdateTxt { txt, done: done_tx })
            .await
            .is_err()
        {
            return Err(Error::Cancelled);
        }

        match done.await {
            Ok(result) => result,
            Err(_) => Err(Error::Cancelled),
        }
    }

    /// A point-in-time copy of a registered service.
    pub fn get(&self, service_id: &str) -> Option<Service> {
        self.registry.get(service_id)
    }

    /// The ids of every registered service, sorted.
    pub fn list(&self) -> Vec<String> {
        self.registry.list()
    }

    /// Subscribes to lifecycle events (probes, announcements, state
    /// changes, conflicts, goodbyes).
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Shuts the responder down: every Established service says goodbye,
    /// all state machines stop, and the socket closes. Idempotent; a
    /// second call is a no-op. Transport close errors propagate.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        info!("responder closing");
        let _ = self.shutdown.send(true);

        let handles: Vec<FsmHandle> = std::mem::take(&mut *self.fsms.lock().unwrap());
        for handle in handles {
            let _ = handle.task.await;
        }

        let receive_task = self.receive_task.lock().unwrap().take();
        if let Some(task) = receive_task {
            let _ = task.await;
        }

        for service_id in self.registry.list() {
            self.registry.remove(&service_id);
        }

        self.transport.close().await
    }

    fn take_handle(&self, service_id: &str) -> Option<FsmHandle> {
        let mut fsms = self.fsms.lock().unwrap();
        let index = fsms
            .iter()
            .position(|h| h.shared_id.lock().unwrap().as_str() == service_id)?;
        Some(fsms.remove(index))
    }
}

/// Reads packets until shutdown: queries go to the query handler, records
/// seen in responses (and in competing probes) go to whichever state
/// machines are still probing.
async fn receive_loop(
    transport: Arc<dyn Transport>,
    registry: Arc<Registry>,
    limiter: Arc<RateLimiter>,
    fsms: Arc<Mutex<Vec<FsmHandle>>>,
    config: Config,
    interface: String,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let received = tokio::select! {
            _ = shutdown.changed() => return,
            received = transport.receive() => received,
        };

        let (packet, src) = match received {
            Ok(r) => r,
            Err(Error::Shutdown) => return,
            Err(e) => {
                debug!("receive failed: {}", e);
                continue;
            }
        };

        handle_packet(
            packet, src, &transport, &registry, &limiter, &fsms, &config, &interface,
        )
        .await;
    }
}

#[allow(clippy::too_many_arguments)]
async fn handle_packet(
    packet: Bytes,
    src: SocketAddr,
    transport: &Arc<dyn Transport>,
    registry: &Registry,
    limiter: &RateLimiter,
    fsms: &Mutex<Vec<FsmHandle>>,
    config: &Config,
    interface: &str,
) {
    // Multicast DNS is link-local; off-link sources are dropped before the
    // parser ever sees them.
    if !allow_source(&src, config.interface, config.netmask) {
        debug!("dropping off-link packet from {}", src);
        return;
    }

    if log::log_enabled!(log::Level::Trace) {
        trace!("{} bytes from {}\n{}", packet.len(), src, hexdump(&packet));
    }

    let message = match Message::from_slice(&packet) {
        Ok(m) => m,
        Err(e) => {
            // One bad packet must never take the loop down.
            debug!("discarding malformed packet from {}: {}", src, e);
            return;
        }
    };

    if message.is_query() && message.opcode == Opcode::Query {
        // A competing prober's proposed records arrive in the authority
        // section of its probe query (rfc6762 section 8.2).
        dispatch_conflicts(&message.authoritys, registry, fsms);

        for outbound in handle_query(&message, src, registry, limiter, interface) {
            let bytes = match outbound.message.to_vec() {
                Ok(b) => b,
                Err(e) => {
                    warn!("failed to encode response: {}", e);
                    continue;
                }
            };

            match transport.send(&bytes, outbound.dest).await {
                Ok(()) => {
                    // Stamp only after the send completed.
                    for fingerprint in &outbound.fingerprints {
                        limiter.record_multicast(fingerprint, interface);
                    }
                }
                Err(e) => warn!("failed to send response to {:?}: {}", outbound.dest, e),
            }
        }
    } else if message.is_response() {
        let records: Vec<Record> = message
            .answers
            .iter()
            .chain(message.authoritys.iter())
            .cloned()
            .collect();
        dispatch_conflicts(&records, registry, fsms);
    }
}

/// Hands records seen on the wire to every state machine still probing a
/// matching name. The channel is bounded with plenty of slack; a machine
/// that still manages to fall behind loses conflicts noisily, never
/// silently.
fn dispatch_conflicts(records: &[Record], registry: &Registry, fsms: &Mutex<Vec<FsmHandle>>) {
    if records.is_empty() {
        return;
    }

    let fsms = fsms.lock().unwrap();
    for handle in fsms.iter() {
        let service_id = handle.shared_id.lock().unwrap().clone();
        let service = match registry.get(&service_id) {
            Some(s) => s,
            None => continue,
        };

        use crate::service::ServiceState::*;
        if !matches!(service.state, Probing(_) | ConflictDetected) {
            continue;
        }

        for record in records {
            let relevant = record.name.eq_ignore_ascii_case(&service_id)
                || record.name.eq_ignore_ascii_case(&service.hostname);
            if !relevant {
                continue;
            }

            if let Err(e) = handle.conflicts.try_send(record.clone()) {
                warn!("conflict channel full for '{}': {}", service_id, e);
            }
        }
    }
}
