//! Port-in-use verification with time-bounded caching
//!
//! Traffic toward a legitimately open service must not raise an alarm, so
//! each surviving packet's destination port is checked against the host's
//! actual socket table. The check binds a throwaway transport-matching
//! socket: bind success means the port was free, bind failure (address in
//! use) means a real service holds it. The probe socket is dropped on every
//! exit path.
//!
//! Binding is a syscall per inspected packet, hence the cache: a positive
//! result is remembered for the configured duration and expired lazily on
//! the next lookup. Negative results are never cached because a free port
//! can be claimed at any moment. The probe itself is racy by nature; it is
//! an accepted heuristic, not a guarantee.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddrV4, TcpListener, UdpSocket};
use std::time::{Duration, Instant};

use crate::config::Protocol;

/// Backend that answers "is this port bound right now".
///
/// A trait seam so tests can substitute a deterministic prober and count
/// live probes.
pub trait PortProber: Send {
    fn in_use(&self, port: u16) -> bool;
}

/// Production prober: bind a socket of the monitored transport type.
pub struct BindProber {
    mode: Protocol,
    addr: Ipv4Addr,
}

impl BindProber {
    pub fn new(mode: Protocol, addr: Ipv4Addr) -> Self {
        Self { mode, addr }
    }
}

impl PortProber for BindProber {
    fn in_use(&self, port: u16) -> bool {
        let addr = SocketAddrV4::new(self.addr, port);
        // The bound socket is dropped at the end of the match arm,
        // releasing the port again.
        match self.mode {
            Protocol::Tcp => TcpListener::bind(addr).is_err(),
            Protocol::Udp => UdpSocket::bind(addr).is_err(),
        }
    }
}

/// Cached port-in-use lookups keyed by destination port.
///
/// Cache entries exist only for ports confirmed in use and map to their
/// expiry instant. A duration of zero or less disables caching entirely and
/// every lookup probes live.
pub struct PortVerifier {
    prober: Box<dyn PortProber>,
    duration: Option<Duration>,
    cache: HashMap<u16, Instant>,
}

impl PortVerifier {
    pub fn new(prober: Box<dyn PortProber>, duration_secs: i64) -> Self {
        let duration = if duration_secs > 0 {
            Some(Duration::from_secs(duration_secs as u64))
        } else {
            None
        };

        Self {
            prober,
            duration,
            cache: HashMap::new(),
        }
    }

    /// Whether `port` is legitimately bound on the host, as of `now`.
    ///
    /// An unexpired cache entry short-circuits the probe. An expired entry
    /// is removed and the probe repeated, since OS port allocation changes
    /// over time.
    pub fn is_port_in_use(&mut self, port: u16, now: Instant) -> bool {
        let Some(duration) = self.duration else {
            return self.prober.in_use(port);
        };

        if let Some(&expiry) = self.cache.get(&port) {
            if expiry > now {
                return true;
            }
            self.cache.remove(&port);
        }

        let in_use = self.prober.in_use(port);
        if in_use {
            self.cache.insert(port, now + duration);
        }
        in_use
    }

    /// Number of unexpired positive entries (expired ones may linger until
    /// their next lookup).
    pub fn cached_ports(&self) -> usize {
        self.cache.len()
    }
}
