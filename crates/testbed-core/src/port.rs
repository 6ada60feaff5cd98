//! TCP port allocation.
//!
//! Ports are picked by binding a probing listener on `0.0.0.0:port`. A port
//! handed out here is also recorded in a process-wide lease set until its
//! [`PortLease`] is dropped, so two live instances in the same process never
//! receive the same port even before either service binds it.

use crate::error::{HarnessError, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::net::{Ipv4Addr, TcpListener};
use std::sync::{LazyLock, Mutex, PoisonError};

static LEASED_PORTS: LazyLock<Mutex<HashSet<u16>>> = LazyLock::new(|| Mutex::new(HashSet::new()));

/// Closed range of TCP ports, `start..=end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    /// First port.
    pub start: u16,
    /// Last port (inclusive).
    pub end: u16,
}

impl PortRange {
    /// Creates a new range.
    #[must_use]
    pub const fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }

    /// Number of ports in the range.
    #[must_use]
    pub const fn len(&self) -> usize {
        if self.end < self.start {
            0
        } else {
            (self.end - self.start) as usize + 1
        }
    }

    /// Returns true if the range holds no usable port.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0 || (self.start == 0 && self.end == 0)
    }

    /// Returns true if `port` lies in the range.
    #[must_use]
    pub const fn contains(&self, port: u16) -> bool {
        port >= self.start && port <= self.end
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// A port reserved for one instance.
///
/// Holds the probing listener until [`PortLease::release_socket`] is called at
/// hand-off, and the in-process lease until dropped.
#[derive(Debug)]
pub struct PortLease {
    port: u16,
    reservation: Option<TcpListener>,
}

impl PortLease {
    /// The leased port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Returns true while the probing listener is still bound.
    #[must_use]
    pub const fn is_reserved(&self) -> bool {
        self.reservation.is_some()
    }

    /// Closes the probing listener so the service can bind the port.
    ///
    /// The in-process lease stays in place.
    pub fn release_socket(&mut self) {
        if self.reservation.take().is_some() {
            tracing::debug!(port = self.port, "released port reservation");
        }
    }
}

impl Drop for PortLease {
    fn drop(&mut self) {
        LEASED_PORTS
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.port);
    }
}

/// Picks free ports within a range.
#[derive(Debug, Clone)]
pub struct PortAllocator {
    range: PortRange,
    max_attempts: usize,
}

impl PortAllocator {
    /// Creates an allocator probing at most `max_attempts` ports per call.
    #[must_use]
    pub fn new(range: PortRange, max_attempts: usize) -> Self {
        Self {
            range,
            max_attempts: max_attempts.max(1),
        }
    }

    /// The range this allocator draws from.
    #[must_use]
    pub const fn range(&self) -> PortRange {
        self.range
    }

    /// Allocates a port that is currently free on the local host.
    ///
    /// Probing starts at a random offset and walks forward through the range,
    /// wrapping at the end.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Config`] for an empty range and
    /// [`HarnessError::NoAvailablePort`] when the attempt budget runs out.
    pub fn allocate(&self) -> Result<PortLease> {
        if self.range.is_empty() {
            return Err(HarnessError::config(format!(
                "invalid port range {}",
                self.range
            )));
        }

        let len = self.range.len();
        let attempts = self.max_attempts.min(len);
        let offset = rand::thread_rng().gen_range(0..len);

        for step in 0..attempts {
            let port = self.port_at((offset + step) % len);
            if port == 0 {
                continue;
            }
            if let Some(lease) = try_lease(port) {
                tracing::debug!(port, range = %self.range, "allocated port");
                return Ok(lease);
            }
        }

        Err(HarnessError::NoAvailablePort {
            start: self.range.start,
            end: self.range.end,
            attempts,
        })
    }

    fn port_at(&self, index: usize) -> u16 {
        // index < len, and len - 1 == end - start, so this stays within u16
        self.range.start + u16::try_from(index).unwrap_or(0)
    }
}

fn try_lease(port: u16) -> Option<PortLease> {
    let mut leased = LEASED_PORTS.lock().unwrap_or_else(PoisonError::into_inner);
    if leased.contains(&port) {
        return None;
    }

    let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).ok()?;
    leased.insert(port);

    Some(PortLease {
        port,
        reservation: Some(listener),
    })
}
