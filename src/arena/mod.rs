//! Index-addressed node storage for the cache tree.
//!
//! Nodes live in a single `Vec` and refer to each other by 32-bit slot
//! indices instead of pointers. This gives us:
//! - Parent back-links that can never dangle or alias a live borrow
//! - Slot reuse through a free list, so split/merge churn does not grow memory
//! - Plain `&Tree` traversal for readers (no reference counting)

use std::ops::{Index, IndexMut};

use crate::tree::node::Node;

/// A 32-bit slot index into a [`NodeArena`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub(crate) struct NodeRef(u32);

impl NodeRef {
    /// Create a null reference (represents no node).
    pub(crate) const fn null() -> Self {
        Self(u32::MAX)
    }

    /// Check if this reference is null.
    #[inline]
    pub(crate) fn is_null(self) -> bool {
        self.0 == u32::MAX
    }

    /// Create a reference from a slot index.
    ///
    /// # Panics
    /// Panics if the index is >= 2^32 - 1.
    pub(crate) fn from_usize(index: usize) -> Self {
        assert!(index < u32::MAX as usize, "Node arena index too large");
        Self(index as u32)
    }

    /// Get the slot index as usize.
    #[inline]
    pub(crate) fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// Slab of tree nodes with free-list reuse.
pub(crate) struct NodeArena {
    slots: Vec<Node>,
    free: Vec<NodeRef>,
}

impl NodeArena {
    pub(crate) fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    /// Store `node` and return its reference, reusing a freed slot if any.
    pub(crate) fn alloc(&mut self, node: Node) -> NodeRef {
        match self.free.pop() {
            Some(r) => {
                self.slots[r.as_usize()] = node;
                r
            }
            None => {
                let r = NodeRef::from_usize(self.slots.len());
                self.slots.push(node);
                r
            }
        }
    }

    /// Release a slot. The node's contents are dropped immediately.
    pub(crate) fn free(&mut self, r: NodeRef) {
        debug_assert!(!r.is_null());
        debug_assert!(!self.free.contains(&r), "double free of {r:?}");
        self.slots[r.as_usize()] = Node::vacant();
        self.free.push(r);
    }

    /// Number of slots currently holding a node.
    pub(crate) fn live_nodes(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Drop every node and every free slot.
    pub(crate) fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
    }

    /// Total slots (live + free).
    #[cfg(test)]
    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }
}

impl Index<NodeRef> for NodeArena {
    type Output = Node;

    #[inline]
    fn index(&self, r: NodeRef) -> &Node {
        &self.slots[r.as_usize()]
    }
}

impl IndexMut<NodeRef> for NodeArena {
    #[inline]
    fn index_mut(&mut self, r: NodeRef) -> &mut Node {
        &mut self.slots[r.as_usize()]
    }
}
