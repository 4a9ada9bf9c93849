//! # lookup-cache
//!
//! A bounded, coalescing cache of object-ID ownership ranges.
//!
//! Storage nodes learn from the coordinators which node owns which range of
//! global object ids. Asking a coordinator on every access is too slow, so
//! each node keeps the answers it has seen in a [`CacheTree`]: a B-tree of
//! range *boundaries*, where an entry `(b, o)` means "the ids after the
//! previous boundary up to and including `b` are owned by `o`".
//!
//! ## Features
//!
//! - **Coalescing**: adjacent ranges with the same owner collapse into one
//!   entry, so memory tracks distinct ranges rather than cached accesses
//! - **Point and range queries** in `O(log n)` under a shared lock
//! - **Invalidation** of single ids, whole ranges, or every range of a failed node
//! - **Time-based eviction**: a background thread samples the tree and drops
//!   ranges that have not been touched within the TTL
//!
//! Answers are hints. A stale entry is resolved by the caller re-asking the
//! coordinator on a miss or a wrong-owner response.
//!
//! ## Example
//!
//! ```rust
//! use lookup_cache::{CacheTree, INVALID_OWNER};
//! use std::time::Duration;
//!
//! let cache = CacheTree::new(2, Duration::from_secs(1), 10_000).unwrap();
//! cache.cache_range(100, 200, 7);
//! assert_eq!(cache.get_primary_peer(150), 7);
//!
//! let range = cache.get_metadata(150).unwrap();
//! assert_eq!((range.owner, range.start, range.end), (7, 100, 200));
//!
//! cache.cache_chunk_id(150, 9);
//! assert_eq!(cache.get_primary_peer(149), 7);
//! assert_eq!(cache.get_primary_peer(150), 9);
//! assert_eq!(cache.get_primary_peer(151), 7);
//!
//! cache.invalidate_range(120);
//! assert_eq!(cache.get_primary_peer(120), INVALID_OWNER);
//! cache.close();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod arena;
pub mod error;
mod evict;
mod policy;
pub mod resolver;
mod tree;

pub use error::{CacheError, Result};
pub use resolver::{Coordinator, LookupResolver};
pub use tree::Entry;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use evict::Evictor;
use tree::Tree;

/// Global object identifier.
pub type ObjectId = u64;

/// Cluster node identifier.
pub type OwnerId = u16;

/// Reserved id marking the end of the address space. Always present in the
/// tree as the rightmost boundary, owned by [`INVALID_OWNER`].
pub const ID_MAX: ObjectId = u64::MAX;

/// Reserved owner meaning "no known owner". Acts as a barrier: ranges are
/// never coalesced across it with a real owner.
pub const INVALID_OWNER: OwnerId = u16::MAX;

/// Default B-tree order (minimum entries per non-root node).
pub const DEFAULT_ORDER: u16 = 10;

/// Bits of an object id that are local to its creating node.
pub const LOCAL_ID_BITS: u32 = 48;

const LOCAL_ID_MASK: ObjectId = (1 << LOCAL_ID_BITS) - 1;

/// Node that created `id` (the top 16 bits).
#[inline]
pub fn creator_of(id: ObjectId) -> OwnerId {
    (id >> LOCAL_ID_BITS) as OwnerId
}

/// Compose a global id from a creator and a creator-local id.
#[inline]
pub fn with_creator(creator: OwnerId, local: ObjectId) -> ObjectId {
    ((creator as ObjectId) << LOCAL_ID_BITS) | (local & LOCAL_ID_MASK)
}

/// A cached ownership range, `start..=end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeInfo {
    /// Node owning the range.
    pub owner: OwnerId,
    /// First id of the range.
    pub start: ObjectId,
    /// Last id of the range.
    pub end: ObjectId,
}

impl RangeInfo {
    /// Check if `id` falls inside this range.
    pub fn contains(&self, id: ObjectId) -> bool {
        self.start <= id && id <= self.end
    }
}

/// Configuration for the cache tree.
#[derive(Debug, Clone)]
pub struct Config {
    /// B-tree order: non-root nodes hold `order..=2 * order` entries
    pub order: u16,
    /// Idle time after which a subtree may be evicted
    pub ttl: Duration,
    /// Soft cap on cached boundaries; above it eviction ignores the TTL
    pub max_size: u64,
    /// How often the eviction thread wakes up
    pub sweep_interval: Duration,
    /// Start the eviction thread at construction
    pub background_eviction: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            order: DEFAULT_ORDER,
            ttl: Duration::from_secs(1),
            max_size: 100_000,
            sweep_interval: Duration::from_secs(1),
            background_eviction: true,
        }
    }
}

/// State shared between the cache handle and the eviction thread.
pub(crate) struct Shared {
    tree: RwLock<Tree>,
    config: Config,
}

impl Shared {
    /// One eviction step under the write lock.
    pub(crate) fn sweep(&self) -> bool {
        let mut tree = self.tree.write();
        tree.evict_step(self.config.ttl, self.config.max_size, &mut rand::thread_rng())
    }
}

/// Thread-safe cache of object-ID ownership ranges.
///
/// Lookups take a shared lock; every mutation, and each eviction sweep,
/// takes the exclusive lock for its whole duration.
///
/// Lookups also refresh the access stamps of the nodes they pass through.
/// Those stamps are plain relaxed atomics written under the *shared* lock,
/// so concurrent readers may overwrite each other's stamps. That is
/// intentional: eviction only needs an approximate recency signal.
pub struct CacheTree {
    shared: Arc<Shared>,
    evictor: Mutex<Option<Evictor>>,
}

impl CacheTree {
    /// Create a cache with the given order, TTL and size cap, and start its
    /// eviction thread.
    pub fn new(order: u16, ttl: Duration, max_size: u64) -> Result<Self> {
        Self::with_config(Config {
            order,
            ttl,
            max_size,
            ..Config::default()
        })
    }

    /// Create a cache with the given configuration.
    pub fn with_config(config: Config) -> Result<Self> {
        if config.order < 2 {
            return Err(CacheError::InvalidOrder {
                order: config.order,
            });
        }
        if config.background_eviction && config.sweep_interval.is_zero() {
            return Err(CacheError::InvalidSweepInterval);
        }

        let shared = Arc::new(Shared {
            tree: RwLock::new(Tree::new(config.order)),
            config,
        });
        let evictor = if shared.config.background_eviction {
            Some(Evictor::start(Arc::clone(&shared), shared.config.sweep_interval)?)
        } else {
            None
        };

        Ok(Self {
            shared,
            evictor: Mutex::new(evictor),
        })
    }

    /// The configuration this cache was built with.
    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// Forget everything.
    pub fn clear(&self) {
        self.shared.tree.write().clear();
    }

    /// Owner of the range containing `id`, or [`INVALID_OWNER`] if nothing
    /// is cached for it.
    pub fn get_primary_peer(&self, id: ObjectId) -> OwnerId {
        self.shared.tree.read().primary_peer(id)
    }

    /// Owner and bounds of the cached range containing `id`.
    pub fn get_metadata(&self, id: ObjectId) -> Option<RangeInfo> {
        self.shared.tree.read().metadata(id)
    }

    /// Cache `[start, end]` as owned by `owner`.
    ///
    /// Returns `false` if the range is empty (`start > end`) or would claim
    /// the reserved [`ID_MAX`] for a real owner.
    pub fn cache_range(&self, start: ObjectId, end: ObjectId, owner: OwnerId) -> bool {
        self.shared.tree.write().cache_range(start, end, owner)
    }

    /// Cache a single id as owned by `owner`.
    pub fn cache_chunk_id(&self, id: ObjectId, owner: OwnerId) -> bool {
        self.cache_range(id, id, owner)
    }

    /// Forget the owner of `id` alone.
    pub fn invalidate_chunk_id(&self, id: ObjectId) {
        self.shared.tree.write().invalidate_chunk_id(id);
    }

    /// Forget the whole cached range containing `id`, returning it.
    pub fn invalidate_range(&self, id: ObjectId) -> Option<RangeInfo> {
        self.shared.tree.write().invalidate_range(id)
    }

    /// Forget every range owned by `owner`. Returns the number of ranges dropped.
    pub fn invalidate_peer(&self, owner: OwnerId) -> usize {
        self.shared.tree.write().invalidate_peer(owner)
    }

    /// Number of cached boundaries, not counting the `ID_MAX` sentinel.
    ///
    /// Returned as `usize` rather than a signed count: it is never negative
    /// and is bounded by memory.
    pub fn size(&self) -> usize {
        self.shared.tree.read().size()
    }

    /// Check if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Snapshot of every boundary in order, sentinel included.
    pub fn entries(&self) -> Vec<Entry> {
        self.shared.tree.read().entries()
    }

    /// Height of the underlying tree.
    pub fn height(&self) -> usize {
        self.shared.tree.read().height()
    }

    /// Check every structural invariant.
    pub fn validate(&self) -> bool {
        self.verify_integrity().is_empty()
    }

    /// Describe every structural invariant violation found.
    pub fn verify_integrity(&self) -> Vec<String> {
        self.shared.tree.read().verify_integrity()
    }

    /// Run one eviction step now. Returns `true` if something was evicted.
    pub fn sweep(&self) -> bool {
        self.shared.sweep()
    }

    /// Stop the eviction thread. Safe to call more than once.
    pub fn close(&self) {
        if let Some(mut evictor) = self.evictor.lock().take() {
            evictor.stop();
        }
    }
}

impl fmt::Display for CacheTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.shared.tree.read(), f)
    }
}

impl fmt::Debug for CacheTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheTree")
            .field("config", &self.shared.config)
            .field("size", &self.size())
            .finish()
    }
}

impl Drop for CacheTree {
    fn drop(&mut self) {
        self.close();
    }
}


#[cfg(test)]
mod proptests;
