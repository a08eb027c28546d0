// src/core/transport.rs

//! Target-host selection for outgoing requests.
//!
//! Each request claims a slot on the host with the fewest requests currently
//! in flight. The scan starts at a random index so that equal counters do not
//! funnel every request to the first host. Counters bias selection only; they
//! are not a hard cap.

use parking_lot::Mutex;
use rand::Rng;
use std::sync::Arc;

/// The configured set of `host:port` targets plus per-host in-flight counts.
#[derive(Debug)]
pub struct HostPool {
    hosts: Vec<String>,
    in_flight: Mutex<Vec<usize>>,
}

impl HostPool {
    pub fn new(hosts: Vec<String>) -> Self {
        let counters = vec![0; hosts.len()];
        Self {
            hosts,
            in_flight: Mutex::new(counters),
        }
    }

    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    /// Picks an arbitrary target host, used for the one-shot initialize call.
    pub fn random_host(&self) -> &str {
        let i = rand::thread_rng().gen_range(0..self.hosts.len());
        &self.hosts[i]
    }

    /// Claims a slot on the least-loaded host. The returned guard releases
    /// the slot when dropped.
    pub fn acquire(self: &Arc<Self>) -> HostSlot {
        let index = {
            let mut counts = self.in_flight.lock();
            let mut best = rand::thread_rng().gen_range(0..counts.len());
            for (i, &cnt) in counts.iter().enumerate() {
                if cnt < counts[best] {
                    best = i;
                }
            }
            counts[best] += 1;
            best
        };
        HostSlot {
            pool: Arc::clone(self),
            index,
        }
    }

    /// Current per-host in-flight counts.
    pub fn in_flight_snapshot(&self) -> Vec<usize> {
        self.in_flight.lock().clone()
    }
}

/// An acquired host slot. Holds the in-flight count until dropped.
#[derive(Debug)]
pub struct HostSlot {
    pool: Arc<HostPool>,
    index: usize,
}

impl HostSlot {
    pub fn host(&self) -> &str {
        &self.pool.hosts[self.index]
    }
}

impl Drop for HostSlot {
    fn drop(&mut self) {
        let mut counts = self.pool.in_flight.lock();
        counts[self.index] = counts[self.index].saturating_sub(1);
    }
}
