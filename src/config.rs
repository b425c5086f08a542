//! Responder configuration.

use std::net::Ipv4Addr;

/// Options accepted by [`Responder::new`].
///
/// Interface *enumeration* is the host application's business; the
/// responder takes exactly one IPv4 interface address and announces on it.
///
/// [`Responder::new`]: crate::Responder::new
#[derive(Clone, Debug)]
pub struct Config {
    /// The responder's host name, e.g. "myhost.local". Services registered
    /// with an empty [`Service::hostname`] inherit it, and their A records
    /// answer for it. Hostname discovery is the host application's
    /// business; the default is a placeholder, not the system name.
    ///
    /// [`Service::hostname`]: crate::Service::hostname
    pub hostname: String,

    /// Address of the interface to join the multicast group on.
    /// `0.0.0.0` lets the OS pick.
    pub interface: Ipv4Addr,

    /// Netmask of that interface, used to scope accepted packet sources to
    /// the local subnet.
    pub netmask: Ipv4Addr,

    /// Whether to also set `SO_REUSEPORT`, so this responder coexists with
    /// others on the same host. On by default.
    pub reuse_port: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            hostname: "localhost.local".to_string(),
            interface: Ipv4Addr::UNSPECIFIED,
            netmask: Ipv4Addr::new(255, 255, 255, 0),
            reuse_port: true,
        }
    }
}
