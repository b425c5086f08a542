//! The per-service state machine: probing, announcing, defending and
//! withdrawing one service. [rfc6762] sections 8-10.
//!
//! One task runs per registered service. It owns nothing shared; it talks
//! to the responder through channels and to the world through the
//! transport.
//!
//! [rfc6762]: https://datatracker.ietf.org/doc/html/rfc6762

use crate::conflict::{tiebreak, Tiebreak};
use crate::errors::{Error, Result};
use crate::limiter::{Fingerprint, RateLimiter};
use crate::registry::{Registry, RenameError};
use crate::service::{next_instance_name, ServiceState};
use crate::transport::Transport;
use crate::types::{Class, Message, Record, Type};
use log::{debug, info, warn};
use rand::Rng;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::sleep;

/// Probes are sent three times, 250ms apart ([rfc6762] section 8.1).
///
/// [rfc6762]: https://datatracker.ietf.org/doc/html/rfc6762
pub(crate) const PROBE_ROUNDS: u8 = 3;
const PROBE_INTERVAL: Duration = Duration::from_millis(250);

/// The first probe waits a random 0-250ms, so hosts powering on together
/// do not probe in lockstep.
const PROBE_JITTER_MS: u64 = 250;

/// Announcements are sent twice, one second apart ([rfc6762] section 8.3).
///
/// [rfc6762]: https://datatracker.ietf.org/doc/html/rfc6762
pub(crate) const ANNOUNCE_ROUNDS: u8 = 2;
const ANNOUNCE_INTERVAL: Duration = Duration::from_secs(1);

/// Pause before re-probing under a fresh name after a lost tiebreak.
const RENAME_BACKOFF: Duration = Duration::from_secs(1);

/// How many renames to attempt before giving up on the registration.
pub(crate) const MAX_RENAMES: u32 = 10;

/// Budget for the best-effort goodbye when the responder shuts down.
const GOODBYE_DEADLINE: Duration = Duration::from_secs(1);

/// Slack in the conflict channel; enough that the receive loop never has
/// to drop a conflict for a service still probing.
pub(crate) const CONFLICT_CHANNEL_CAPACITY: usize = 64;

/// Lifecycle notifications published by the responder on a broadcast
/// channel; subscribe with [`Responder::subscribe`].
///
/// [`Responder::subscribe`]: crate::Responder::subscribe
#[derive(Clone, Debug)]
pub enum Event {
    StateChanged {
        service_id: String,
        state: ServiceState,
    },
    ProbeSent {
        service_id: String,
        round: u8,
    },
    AnnounceSent {
        service_id: String,
        round: u8,
    },
    ConflictDetected {
        service_id: String,
    },
    Renamed {
        old_id: String,
        new_id: String,
    },
    GoodbyeSent {
        service_id: String,
    },
}

/// Requests the responder sends to a running state machine.
pub(crate) enum Command {
    Unregister {
        done: oneshot::Sender<Result<()>>,
    },
    UpdateTxt {
        txt: BTreeMap<String, String>,
        done: oneshot::Sender<Result<()>>,
    },
}

pub(crate) struct ServiceFsm {
    /// The id this state machine currently answers to; renames move it.
    pub service_id: String,

    /// The same id, readable by the responder for dispatch.
    pub shared_id: Arc<Mutex<String>>,

    pub registry: Arc<Registry>,
    pub transport: Arc<dyn Transport>,
    pub limiter: Arc<RateLimiter>,
    pub interface: String,

    pub commands: mpsc::Receiver<Command>,
    pub conflicts: mpsc::Receiver<Record>,
    pub events: broadcast::Sender<Event>,
    pub shutdown: watch::Receiver<bool>,
}

impl ServiceFsm {
    /// Drives the service to Established (resolving `registered` with the
    /// final, possibly renamed, service id), then serves it until
    /// unregistered or shut down.
    pub async fn run(mut self, registered: oneshot::Sender<Result<String>>) {
        match self.advertise().await {
            Ok(()) => {
                let _ = registered.send(Ok(self.service_id.clone()));
                self.serve().await;
            }
            Err(e) => {
                self.registry.remove(&self.service_id);
                let _ = registered.send(Err(e));
            }
        }
    }

    /// Probing and announcing, with renames on lost tiebreaks.
    async fn advertise(&mut self) -> Result<()> {
        if *self.shutdown.borrow() {
            return Err(Error::Cancelled);
        }

        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..=PROBE_JITTER_MS));
        self.wait(jitter).await?;

        let mut renames = 0;

        'probing: loop {
            for round in 1..=PROBE_ROUNDS {
                self.set_state(ServiceState::Probing(round));
                self.send_probe(round).await?;

                // Watch for answers to our probe during the gap before the
                // next one.
                let gap = sleep(PROBE_INTERVAL);
                tokio::pin!(gap);

                loop {
                    tokio::select! {
                        _ = &mut gap => break,

                        maybe = self.conflicts.recv() => match maybe {
                            Some(theirs) => {
                                if !self.lost_tiebreak(&theirs) {
                                    // We win (or it is our own data); keep
                                    // probing as if nothing happened.
                                    continue;
                                }

                                info!("'{}' lost a probe tiebreak", self.service_id);
                                self.emit(Event::ConflictDetected {
                                    service_id: self.service_id.clone(),
                                });
                                self.set_state(ServiceState::ConflictDetected);

                                // Walk the "-N" suffixes until a free name
                                // turns up. A target id another local
                                // service owns is just as conflicted as
                                // one claimed on the wire, and draws on
                                // the same budget.
                                let mut instance = self.service()?.instance_name;
                                loop {
                                    if renames >= MAX_RENAMES {
                                        return Err(Error::Conflict {
                                            service_id: self.service_id.clone(),
                                            attempts: renames,
                                        });
                                    }
                                    renames += 1;

                                    instance = next_instance_name(&instance);
                                    if self.rename_to(&instance)? {
                                        break;
                                    }
                                }

                                self.wait(RENAME_BACKOFF).await?;
                                continue 'probing;
                            }
                            // The responder went away; nothing to defend
                            // against any more.
                            None => {
                                gap.as_mut().await;
                                break;
                            }
                        },

                        _ = self.shutdown.changed() => return Err(Error::Cancelled),
                    }
                }
            }

            break;
        }

        for round in 1..=ANNOUNCE_ROUNDS {
            self.set_state(ServiceState::Announcing(round));
            self.announce(round).await?;

            if round < ANNOUNCE_ROUNDS {
                self.wait(ANNOUNCE_INTERVAL).await?;
            }
        }

        self.set_state(ServiceState::Established);
        info!("'{}' established", self.service_id);

        Ok(())
    }

    /// The Established phase: answer commands, log stray conflicts, and
    /// say goodbye on shutdown.
    async fn serve(&mut self) {
        loop {
            tokio::select! {
                maybe = self.commands.recv() => match maybe {
                    Some(Command::Unregister { done }) => {
                        let _ = done.send(self.goodbye().await);
                        return;
                    }
                    Some(Command::UpdateTxt { txt, done }) => {
                        let _ = done.send(self.update_txt(txt).await);
                    }
                    None => return,
                },

                maybe = self.conflicts.recv() => match maybe {
                    Some(theirs) => {
                        // Outside probing a conflicting record is
                        // surprising; note it and move on.
                        if self.lost_tiebreak(&theirs) {
                            warn!(
                                "'{}' saw a conflicting {} record after establishment",
                                self.service_id,
                                theirs.r#type()
                            );
                        }
                    }
                    None => return,
                },

                _ = self.shutdown.changed() => {
                    let _ = tokio::time::timeout(GOODBYE_DEADLINE, self.goodbye()).await;
                    return;
                }
            }
        }
    }

    /// One probe: QTYPE ANY questions for both names we are claiming, with
    /// the proposed unique records in the authority section.
    async fn send_probe(&mut self, round: u8) -> Result<()> {
        let service = self.service()?;

        let mut m = Message::default();
        m.add_question(&service.service_id(), Type::ANY, Class::Internet);
        m.add_question(&service.hostname, Type::ANY, Class::Internet);
        m.authoritys = service.unique_records();

        self.transport.send(&m.to_vec()?, None).await?;
        debug!(
            "probe {}/{} for '{}'",
            round, PROBE_ROUNDS, self.service_id
        );
        self.emit(Event::ProbeSent {
            service_id: self.service_id.clone(),
            round,
        });

        Ok(())
    }

    /// One unsolicited response asserting all four records.
    async fn announce(&mut self, round: u8) -> Result<()> {
        let service = self.service()?;

        let mut m = Message::response();
        m.answers = service.records();
        self.send_response(m).await?;

        debug!(
            "announcement {}/{} for '{}'",
            round, ANNOUNCE_ROUNDS, self.service_id
        );
        self.emit(Event::AnnounceSent {
            service_id: self.service_id.clone(),
            round,
        });

        Ok(())
    }

    /// Withdraws every record with a zero TTL.
    async fn goodbye(&mut self) -> Result<()> {
        let service = self.service()?;

        let mut m = Message::response();
        m.answers = service
            .records()
            .into_iter()
            .map(|mut r| {
                r.ttl = Duration::ZERO;
                r
            })
            .collect();
        self.send_response(m).await?;

        self.set_state(ServiceState::Goodbye);
        self.emit(Event::GoodbyeSent {
            service_id: self.service_id.clone(),
        });
        info!("'{}' said goodbye", self.service_id);

        Ok(())
    }

    /// Stores new TXT data and announces it once. The name is unchanged,
    /// so no re-probing ([rfc6762] section 8.4).
    ///
    /// [rfc6762]: https://datatracker.ietf.org/doc/html/rfc6762
    async fn update_txt(&mut self, txt: BTreeMap<String, String>) -> Result<()> {
        if !self.registry.set_txt(&self.service_id, txt) {
            return Err(Error::Cancelled);
        }
        let service = self.service()?;

        let mut m = Message::response();
        m.answers = vec![service.txt_record()];
        self.send_response(m).await?;

        debug!("updated TXT for '{}'", self.service_id);

        Ok(())
    }

    /// Multicasts a response and stamps its records in the rate limiter
    /// once the send has completed.
    async fn send_response(&self, m: Message) -> Result<()> {
        self.transport.send(&m.to_vec()?, None).await?;

        for record in &m.answers {
            match Fingerprint::of(record) {
                Ok(fp) => self.limiter.record_multicast(&fp, &self.interface),
                Err(e) => debug!("no fingerprint for {}: {}", record.name, e),
            }
        }

        Ok(())
    }

    /// Whether any of our proposed unique records loses the section 8.2
    /// tiebreak against a record seen on the wire.
    fn lost_tiebreak(&self, theirs: &Record) -> bool {
        let service = match self.registry.get(&self.service_id) {
            Some(s) => s,
            None => return false,
        };

        for ours in service.unique_records() {
            match tiebreak(&ours, theirs) {
                Ok(Tiebreak::Lose) => return true,
                Ok(Tiebreak::Win) | Ok(Tiebreak::Tie) => {}
                Err(e) => debug!("ignoring unencodable wire record: {}", e),
            }
        }

        false
    }

    /// Applies a new instance name to the registry in one step; the old
    /// name is gone before anything else can observe it. `Ok(false)` means
    /// the target id is already taken by another local service and the
    /// caller should try the next candidate.
    fn rename_to(&mut self, new_instance: &str) -> Result<bool> {
        let new_id = match self.registry.rename(&self.service_id, new_instance) {
            Ok(id) => id,
            Err(RenameError::Occupied) => {
                debug!(
                    "'{}' cannot rename to '{}': taken locally",
                    self.service_id, new_instance
                );
                return Ok(false);
            }
            Err(RenameError::Missing) => return Err(Error::Cancelled),
        };

        info!("renamed '{}' to '{}'", self.service_id, new_id);
        self.emit(Event::Renamed {
            old_id: self.service_id.clone(),
            new_id: new_id.clone(),
        });

        *self.shared_id.lock().unwrap() = new_id.clone();
        self.service_id = new_id;

        Ok(true)
    }

    fn service(&self) -> Result<crate::service::Service> {
        self.registry.get(&self.service_id).ok_or(Error::Cancelled)
    }

    fn set_state(&self, state: ServiceState) {
        self.registry.set_state(&self.service_id, state);
        self.emit(Event::StateChanged {
            service_id: self.service_id.clone(),
            state,
        });
    }

    fn emit(&self, event: Event) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }

    /// Sleeps, unless shutdown arrives first.
    async fn wait(&mut self, duration: Duration) -> Result<()> {
        tokio::select! {
            _ = sleep(duration) => Ok(()),
            _ = self.shutdown.changed() => Err(Error::Cancelled),
        }
    }
}
