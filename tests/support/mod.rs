//! An in-memory transport the test suite substitutes for the UDP one:
//! outbound packets land on a channel the test observes, and the test
//! injects inbound packets (including crafted conflicts) at will.

use async_trait::async_trait;
use bytes::Bytes;
use castdns::{Error, Result, Transport};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;

/// One packet the responder tried to send.
pub struct SentPacket {
    pub packet: Vec<u8>,

    /// `None` means the multicast group.
    pub dest: Option<SocketAddr>,

    /// When (on tokio's clock) the send happened.
    pub at: Instant,
}

pub struct MemoryTransport {
    outbound: mpsc::UnboundedSender<SentPacket>,
    inbound: Mutex<mpsc::UnboundedReceiver<(Bytes, SocketAddr)>>,
    inject: mpsc::UnboundedSender<(Bytes, SocketAddr)>,
    closed: AtomicBool,
    close_count: AtomicUsize,
}

impl MemoryTransport {
    pub fn new() -> (Arc<MemoryTransport>, mpsc::UnboundedReceiver<SentPacket>) {
        let (outbound, sent) = mpsc::unbounded_channel();
        let (inject, inbound) = mpsc::unbounded_channel();

        let transport = Arc::new(MemoryTransport {
            outbound,
            inbound: Mutex::new(inbound),
            inject,
            closed: AtomicBool::new(false),
            close_count: AtomicUsize::new(0),
        });

        (transport, sent)
    }

    /// A handle tests use to feed packets to the responder.
    pub fn injector(&self) -> mpsc::UnboundedSender<(Bytes, SocketAddr)> {
        self.inject.clone()
    }

    pub fn close_count(&self) -> usize {
        self.close_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, packet: &[u8], dest: Option<SocketAddr>) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Shutdown);
        }

        let _ = self.outbound.send(SentPacket {
            packet: packet.to_vec(),
            dest,
            at: Instant::now(),
        });
        Ok(())
    }

    async fn receive(&self) -> Result<(Bytes, SocketAddr)> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Shutdown);
        }

        let mut inbound = self.inbound.lock().await;
        match inbound.recv().await {
            Some(packet) => Ok(packet),
            None => Err(Error::Shutdown),
        }
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.close_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
