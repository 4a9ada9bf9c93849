//! Tree node layout.
//!
//! Each node holds a sorted run of [`Entry`] boundaries and, for internal
//! nodes, one more child than it has entries. Child `i` holds every
//! boundary between `entries[i - 1]` and `entries[i]`.

use std::sync::atomic::{AtomicU64, Ordering};

use smallvec::SmallVec;

use crate::arena::NodeRef;
use crate::{ObjectId, OwnerId, DEFAULT_ORDER};

/// Inline entry capacity: a full node at the default order plus the
/// transient overflow entry that triggers a split.
const INLINE_ENTRIES: usize = 2 * DEFAULT_ORDER as usize + 1;
const INLINE_CHILDREN: usize = INLINE_ENTRIES + 1;

pub(crate) type Entries = SmallVec<[Entry; INLINE_ENTRIES]>;
pub(crate) type Children = SmallVec<[NodeRef; INLINE_CHILDREN]>;

/// A cached boundary: the range ending at `boundary` belongs to `owner`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Entry {
    /// Right (inclusive) edge of the range.
    pub boundary: ObjectId,
    /// Node owning the range.
    pub owner: OwnerId,
}

impl Entry {
    #[inline]
    pub(crate) fn new(boundary: ObjectId, owner: OwnerId) -> Self {
        Self { boundary, owner }
    }
}

pub(crate) struct Node {
    pub(crate) entries: Entries,
    pub(crate) children: Children,
    pub(crate) parent: NodeRef,
    /// Nanoseconds since the tree's epoch. Written with `Relaxed` stores by
    /// readers holding only the shared lock; lost updates are acceptable
    /// since eviction only needs an approximate recency signal.
    last_access: AtomicU64,
}

impl Node {
    pub(crate) fn new(parent: NodeRef, now: u64) -> Self {
        Self {
            entries: Entries::new(),
            children: Children::new(),
            parent,
            last_access: AtomicU64::new(now),
        }
    }

    /// Placeholder stored in freed arena slots.
    pub(crate) fn vacant() -> Self {
        Self::new(NodeRef::null(), 0)
    }

    #[inline]
    pub(crate) fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Binary search by boundary: `Ok(i)` on a hit, `Err(insertion point)`.
    #[inline]
    pub(crate) fn search(&self, id: ObjectId) -> Result<usize, usize> {
        self.entries.binary_search_by(|e| e.boundary.cmp(&id))
    }

    #[inline]
    pub(crate) fn first(&self) -> Option<Entry> {
        self.entries.first().copied()
    }

    #[inline]
    pub(crate) fn last(&self) -> Option<Entry> {
        self.entries.last().copied()
    }

    /// Slot of `child` in this node's child list.
    pub(crate) fn child_index(&self, child: NodeRef) -> Option<usize> {
        self.children.iter().position(|&c| c == child)
    }

    #[inline]
    pub(crate) fn touch(&self, now: u64) {
        self.last_access.store(now, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn last_access(&self) -> u64 {
        self.last_access.load(Ordering::Relaxed)
    }
}
