//! Time-based eviction.
//!
//! A background thread wakes every sweep interval, takes the write lock and
//! walks one random root-to-leaf path. The first node on that path whose
//! last access is older than the TTL has every range it describes (from
//! just after its first entry's predecessor up to its last entry)
//! invalidated, and the walk stops there. This is a sampling
//! sweep rather than a full scan: each tick costs `O(height)` plus the
//! invalidation, and idle subtrees are found with high probability over a
//! few ticks.
//!
//! When the cache holds more than `max_size` boundaries, a walk that reaches
//! a leaf without finding anything stale evicts that leaf's span anyway.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};
use rand::Rng;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::tree::Tree;
use crate::{ObjectId, Shared, INVALID_OWNER};

impl Tree {
    /// Pick the span to evict on this tick, if any.
    ///
    /// `now` and the node stamps are nanoseconds on the tree's clock.
    pub(crate) fn stale_span<R: Rng + ?Sized>(
        &self,
        now: u64,
        ttl: Duration,
        over_capacity: bool,
        rng: &mut R,
    ) -> Option<(ObjectId, ObjectId)> {
        let ttl = ttl.as_nanos().min(u64::MAX as u128) as u64;
        let mut node = self.root();
        loop {
            let n = self.node(node);
            // A single-entry node spans nothing to evict: only the sentinel
            // in a leaf root, or a lone separator right after a root split.
            if n.len() > 1 {
                let stale = now.saturating_sub(n.last_access()) > ttl;
                if stale || (over_capacity && n.is_leaf()) {
                    let first = n.first()?.boundary;
                    let last = n.last()?.boundary;
                    return Some((first, last));
                }
            }
            if n.is_leaf() {
                return None;
            }
            node = n.children[rng.gen_range(0..n.children.len())];
        }
    }

    /// Run one eviction step. Returns `true` if a span was invalidated.
    pub(crate) fn evict_step<R: Rng + ?Sized>(
        &mut self,
        ttl: Duration,
        max_size: u64,
        rng: &mut R,
    ) -> bool {
        let now = self.now();
        let over_capacity = self.size() as u64 > max_size;
        let Some((first, last)) = self.stale_span(now, ttl, over_capacity, rng) else {
            return false;
        };

        // Drop every range the node describes, including the one ending at
        // its first boundary.
        let start = self.predecessor(first).map_or(0, |p| p.boundary + 1);
        let before = self.size();
        self.cache_range(start, last, INVALID_OWNER);
        debug!(
            start,
            end = last,
            over_capacity,
            dropped = before.saturating_sub(self.size()),
            "evicted idle span"
        );
        true
    }
}

/// Stop flag shared with the eviction thread.
struct StopSignal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

/// Handle to the background eviction thread.
pub(crate) struct Evictor {
    signal: Arc<StopSignal>,
    worker: Option<JoinHandle<()>>,
}

impl Evictor {
    /// Start sweeping `shared` every `interval`.
    pub(crate) fn start(shared: Arc<Shared>, interval: Duration) -> Result<Self> {
        let signal = Arc::new(StopSignal {
            stopped: Mutex::new(false),
            wake: Condvar::new(),
        });

        let worker_signal = Arc::clone(&signal);
        let worker = thread::Builder::new()
            .name("cache-tree-evictor".to_owned())
            .spawn(move || {
                let mut stopped = worker_signal.stopped.lock();
                while !*stopped {
                    worker_signal.wake.wait_for(&mut stopped, interval);
                    if *stopped {
                        break;
                    }
                    // Never hold the stop flag while waiting on the tree lock.
                    MutexGuard::unlocked(&mut stopped, || {
                        shared.sweep();
                    });
                }
            })?;

        info!(interval_ms = interval.as_millis() as u64, "cache eviction thread started");
        Ok(Self {
            signal,
            worker: Some(worker),
        })
    }

    /// Signal the thread and wait for it to exit. Idempotent.
    pub(crate) fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        *self.signal.stopped.lock() = true;
        self.signal.wake.notify_all();
        if worker.join().is_err() {
            warn!("cache eviction thread panicked");
        } else {
            info!("cache eviction thread stopped");
        }
    }
}

impl Drop for Evictor {
    fn drop(&mut self) {
        self.stop();
    }
}
