//! Collision-free loopback port assignment.
//!
//! One lock covers the whole choose-candidate / probe-bind / record
//! sequence, so two concurrent reservations can never race into the same
//! port. Released ports sit out a grace interval before being handed out
//! again, avoiding TIME_WAIT collisions with a just-stopped child.

use std::{
    collections::{HashMap, HashSet},
    net::{Ipv4Addr, TcpListener},
    time::{Duration, Instant},
};

use {tokio::sync::Mutex, tracing::debug};

use {
    mcphost_common::{Error, Result},
    mcphost_config::PortRange,
};

#[derive(Default)]
struct AllocInner {
    reserved: HashSet<u16>,
    /// Released ports and when they become eligible again.
    cooling: HashMap<u16, Instant>,
}

/// Hands out free loopback TCP ports within a configured range.
pub struct PortAllocator {
    range: PortRange,
    release_grace: Duration,
    inner: Mutex<AllocInner>,
}

impl PortAllocator {
    #[must_use]
    pub fn new(range: PortRange, release_grace: Duration) -> Self {
        Self {
            range,
            release_grace,
            inner: Mutex::new(AllocInner::default()),
        }
    }

    /// Reserve the smallest free port in range whose loopback bind
    /// succeeds. The probe listener is dropped immediately; the
    /// reservation keeps other callers away until [`release`].
    ///
    /// [`release`]: Self::release
    pub async fn reserve(&self) -> Result<u16> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        inner.cooling.retain(|_, eligible_at| *eligible_at > now);

        for port in self.range.low..=self.range.high {
            if inner.reserved.contains(&port) || inner.cooling.contains_key(&port) {
                continue;
            }
            match TcpListener::bind((Ipv4Addr::LOCALHOST, port)) {
                Ok(listener) => {
                    drop(listener);
                    inner.reserved.insert(port);
                    debug!(port, "reserved port");
                    return Ok(port);
                },
                Err(_) => continue,
            }
        }
        Err(Error::PortExhausted(format!(
            "no free port in {}-{}",
            self.range.low, self.range.high
        )))
    }

    /// Return a port to the pool. Idempotent; the port stays in cooldown
    /// for the grace interval.
    pub async fn release(&self, port: u16) {
        let mut inner = self.inner.lock().await;
        if inner.reserved.remove(&port) {
            inner
                .cooling
                .insert(port, Instant::now() + self.release_grace);
            debug!(port, "released port");
        }
    }

    /// Snapshot of currently held reservations.
    pub async fn reserved(&self) -> HashSet<u16> {
        self.inner.lock().await.reserved.clone()
    }
}
