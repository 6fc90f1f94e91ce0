//! Local port allocation
//!
//! Ports come from the OS: bind to port 0, read the assigned port, release
//! the socket so the transport process can bind it. Every handed-out port is
//! tracked in a lease set until its `PortLease` is dropped, so two live
//! sessions never share a port even if the OS would offer it twice.

use dashmap::DashSet;
use std::net::TcpListener;
use std::sync::Arc;

use st_core::TunnelError;

/// Attempts before giving up on finding an unleased port
const MAX_ATTEMPTS: usize = 16;

/// Hands out OS-assigned local ports
pub struct PortAllocator {
    host: String,
    leased: Arc<DashSet<u16>>,
}

/// A port reserved for one session. Released on drop.
pub struct PortLease {
    port: u16,
    leased: Arc<DashSet<u16>>,
}

impl std::fmt::Debug for PortLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortLease").field("port", &self.port).finish()
    }
}

impl PortLease {
    /// The leased port number
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Drop for PortLease {
    fn drop(&mut self) {
        self.leased.remove(&self.port);
        tracing::trace!("Released local port {}", self.port);
    }
}

impl PortAllocator {
    /// Create an allocator for ports on `host` (e.g. `127.0.0.1`)
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            leased: Arc::new(DashSet::new()),
        }
    }

    /// Reserve a free port
    pub fn allocate(&self) -> Result<PortLease, TunnelError> {
        for _ in 0..MAX_ATTEMPTS {
            let listener = TcpListener::bind((self.host.as_str(), 0)).map_err(|e| {
                TunnelError::PortUnavailable(format!("cannot bind {}: {}", self.host, e))
            })?;
            let port = listener
                .local_addr()
                .map_err(|e| TunnelError::PortUnavailable(e.to_string()))?
                .port();
            drop(listener);

            if self.leased.insert(port) {
                tracing::debug!("Allocated local port {}", port);
                return Ok(PortLease {
                    port,
                    leased: Arc::clone(&self.leased),
                });
            }
            tracing::debug!("Port {} is already leased, asking again", port);
        }

        Err(TunnelError::PortUnavailable(format!(
            "no unleased port on {} after {} attempts",
            self.host, MAX_ATTEMPTS
        )))
    }

    /// Whether `port` can still be bound right now
    pub fn probe(&self, port: u16) -> bool {
        TcpListener::bind((self.host.as_str(), port)).is_ok()
    }

    /// Number of ports currently leased
    pub fn leased_count(&self) -> usize {
        self.leased.len()
    }
}
