//! UDP multicast transport: the one place raw packets enter and leave the
//! responder.

use crate::config::Config;
use crate::errors::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use socket2::{Domain, Protocol, Socket, Type as SockType};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};
use tokio::net::UdpSocket;

/// The IPv4 multicast group reserved for mDNS, [rfc6762] section 3.
///
/// [rfc6762]: https://datatracker.ietf.org/doc/html/rfc6762
pub const MDNS_GROUP: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 251);

/// The mDNS UDP port.
pub const MDNS_PORT: u16 = 5353;

/// Largest packet we expect to see; jumbo-frame tolerant, well past the
/// classic 512 byte DNS limit.
pub const MAX_PACKET_SIZE: usize = 9000;

/// Kernel receive buffer to ask for.
const RECV_BUFFER_SIZE: usize = 64 * 1024;

/// How the responder talks to the network. One concrete IPv4
/// implementation lives in this module; tests substitute their own, and an
/// IPv6 transport must satisfy the same contract.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Writes the whole packet to `dest`, or to the mDNS multicast group
    /// when `dest` is `None`. A partial write is an error.
    async fn send(&self, packet: &[u8], dest: Option<SocketAddr>) -> Result<()>;

    /// Waits for the next packet and returns a copy owned by the caller,
    /// along with its source address.
    async fn receive(&self) -> Result<(Bytes, SocketAddr)>;

    /// Releases the socket. Idempotent; a second close is a no-op.
    async fn close(&self) -> Result<()>;
}

/// A pool of receive buffers. Buffers are zeroed when they come back, so a
/// packet can never leak into a later receive.
pub(crate) struct BufferPool {
    idle: Mutex<Vec<Vec<u8>>>,
    buf_size: usize,
    max_idle: usize,
}

impl BufferPool {
    pub fn new(buf_size: usize, max_idle: usize) -> Arc<BufferPool> {
        Arc::new(BufferPool {
            idle: Mutex::new(Vec::new()),
            buf_size,
            max_idle,
        })
    }

    /// Takes a buffer out of the pool (or makes a fresh one). The buffer
    /// returns to the pool when the guard drops, on every exit path.
    pub fn acquire(self: &Arc<BufferPool>) -> PooledBuffer {
        let buf = self
            .idle
            .lock()
            .unwrap()
            .pop()
            .unwrap_or_else(|| vec![0; self.buf_size]);

        PooledBuffer {
            buf: Some(buf),
            pool: Arc::clone(self),
        }
    }

    fn release(&self, mut buf: Vec<u8>) {
        let mut idle = self.idle.lock().unwrap();
        if idle.len() < self.max_idle {
            buf.iter_mut().for_each(|b| *b = 0);
            idle.push(buf);
        }
    }
}

/// RAII guard over a pooled buffer.
pub(crate) struct PooledBuffer {
    buf: Option<Vec<u8>>,
    pool: Arc<BufferPool>,
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.buf.as_deref().unwrap_or(&[])
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buf.as_deref_mut().unwrap_or(&mut [])
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.release(buf);
        }
    }
}

/// The concrete IPv4 transport.
///
/// The socket binds port 5353 with address reuse (and `SO_REUSEPORT` unless
/// disabled), joins the mDNS group on the configured interface, sets the
/// multicast TTL to 255 as [rfc6762] section 11 requires, and asks for a
/// 64KiB kernel receive buffer.
///
/// [rfc6762]: https://datatracker.ietf.org/doc/html/rfc6762
pub struct UdpTransport {
    socket: Mutex<Option<Arc<UdpSocket>>>,
    pool: Arc<BufferPool>,
}

impl UdpTransport {
    /// Opens and configures the mDNS socket. Must be called from within a
    /// tokio runtime.
    pub fn new(config: &Config) -> Result<UdpTransport> {
        let socket = Socket::new(Domain::IPV4, SockType::DGRAM, Some(Protocol::UDP))
            .map_err(|e| Error::network("create socket", e))?;

        socket
            .set_reuse_address(true)
            .map_err(|e| Error::network("set reuse address", e))?;
        #[cfg(unix)]
        if config.reuse_port {
            socket
                .set_reuse_port(true)
                .map_err(|e| Error::network("set reuse port", e))?;
        }
        socket
            .set_recv_buffer_size(RECV_BUFFER_SIZE)
            .map_err(|e| Error::network("set receive buffer", e))?;

        let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, MDNS_PORT);
        socket
            .bind(&SocketAddr::from(bind_addr).into())
            .map_err(|e| Error::network("bind socket", e))?;

        socket
            .join_multicast_v4(&MDNS_GROUP, &config.interface)
            .map_err(|e| Error::network("join multicast group", e))?;
        socket
            .set_multicast_ttl_v4(255)
            .map_err(|e| Error::network("set multicast ttl", e))?;
        socket
            .set_multicast_loop_v4(true)
            .map_err(|e| Error::network("set multicast loop", e))?;

        socket
            .set_nonblocking(true)
            .map_err(|e| Error::network("set nonblocking", e))?;

        let socket = UdpSocket::from_std(socket.into())
            .map_err(|e| Error::network("register socket", e))?;

        Ok(UdpTransport {
            socket: Mutex::new(Some(Arc::new(socket))),
            pool: BufferPool::new(MAX_PACKET_SIZE, 8),
        })
    }

    fn socket(&self) -> Result<Arc<UdpSocket>> {
        match self.socket.lock().unwrap().as_ref() {
            Some(socket) => Ok(Arc::clone(socket)),
            None => Err(Error::Shutdown),
        }
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send(&self, packet: &[u8], dest: Option<SocketAddr>) -> Result<()> {
        let socket = self.socket()?;
        let dest =
            dest.unwrap_or_else(|| SocketAddr::from(SocketAddrV4::new(MDNS_GROUP, MDNS_PORT)));

        let sent = socket
            .send_to(packet, dest)
            .await
            .map_err(|e| Error::network("send packet", e))?;

        if sent != packet.len() {
            return Err(Error::Network {
                operation: "send packet",
                details: format!("partial write: {} of {} bytes", sent, packet.len()),
                source: io::Error::from(io::ErrorKind::WriteZero),
            });
        }

        Ok(())
    }

    async fn receive(&self) -> Result<(Bytes, SocketAddr)> {
        let socket = self.socket()?;
        let mut buf = self.pool.acquire();

        let (len, src) = socket
            .recv_from(&mut buf)
            .await
            .map_err(|e| Error::network("receive packet", e))?;

        // The pooled buffer is zeroed and returned when `buf` drops; the
        // caller gets its own copy.
        Ok((Bytes::copy_from_slice(&buf[..len]), src))
    }

    async fn close(&self) -> Result<()> {
        // Dropping the tokio socket releases the descriptor. Taking it out
        // of the option makes a second close a no-op.
        self.socket.lock().unwrap().take();
        Ok(())
    }
}

/// Whether a packet from `src` may be processed at all: multicast DNS is
/// link-local, so only 169.254/16 sources and sources on our own subnet
/// qualify. Everything else is dropped before parsing.
pub fn allow_source(src: &SocketAddr, interface: Ipv4Addr, netmask: Ipv4Addr) -> bool {
    match src.ip() {
        IpAddr::V4(ip) => ip.is_link_local() || same_subnet(ip, interface, netmask),
        // This transport is IPv4; an IPv6 transport brings its own filter.
        IpAddr::V6(_) => false,
    }
}

fn same_subnet(a: Ipv4Addr, b: Ipv4Addr, netmask: Ipv4Addr) -> bool {
    let mask = u32::from(netmask);
    u32::from(a) & mask == u32::from(b) & mask
}
