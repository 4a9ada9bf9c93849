//! Balanced multi-way search tree over object-ID boundaries.
//!
//! A classic B-tree specialised for the interval cache: every stored
//! [`Entry`] is the right edge of a half-open ownership range, so the
//! interval structure is implicit in the sorted entry sequence. The tree
//! always contains the `ID_MAX -> INVALID_OWNER` sentinel, which means
//! every id has an entry at or after it.
//!
//! ## Shape
//!
//! - Non-root nodes hold `order..=2 * order` entries.
//! - Internal nodes hold `entries + 1` children.
//! - All leaves sit at the same depth.
//!
//! Insertion splits overflowing nodes around the median and grows the root;
//! deletion borrows from a sibling through the parent or merges with one,
//! collapsing the root when it runs out of entries.

pub(crate) mod debug;
pub(crate) mod node;

use std::mem;
use std::time::Instant;

use crate::arena::{NodeArena, NodeRef};
use crate::{ObjectId, OwnerId, ID_MAX, INVALID_OWNER};

pub use node::Entry;
use node::{Children, Entries, Node};

/// Position of one entry inside the tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Slot {
    pub(crate) node: NodeRef,
    pub(crate) index: usize,
}

impl Slot {
    #[inline]
    fn new(node: NodeRef, index: usize) -> Self {
        Self { node, index }
    }
}

pub(crate) struct Tree {
    arena: NodeArena,
    root: NodeRef,
    min_entries: usize,
    max_entries: usize,
    /// Stored entries, sentinel included.
    count: usize,
    /// Time base for node access stamps.
    epoch: Instant,
}

impl Tree {
    pub(crate) fn new(order: u16) -> Self {
        debug_assert!(order >= 2, "order must be at least 2");
        let min_entries = order as usize;
        let mut tree = Self {
            arena: NodeArena::new(),
            root: NodeRef::null(),
            min_entries,
            max_entries: 2 * min_entries,
            count: 0,
            epoch: Instant::now(),
        };
        tree.clear();
        tree
    }

    /// Drop everything and reinstall the sentinel.
    pub(crate) fn clear(&mut self) {
        self.arena.clear();
        let mut root = Node::new(NodeRef::null(), self.now());
        root.entries.push(Entry::new(ID_MAX, INVALID_OWNER));
        self.root = self.arena.alloc(root);
        self.count = 1;
    }

    /// Nanoseconds since this tree was created.
    #[inline]
    pub(crate) fn now(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    /// Cached boundaries, not counting the sentinel.
    #[inline]
    pub(crate) fn size(&self) -> usize {
        self.count - 1
    }

    #[inline]
    pub(crate) fn root(&self) -> NodeRef {
        self.root
    }

    #[inline]
    pub(crate) fn node(&self, r: NodeRef) -> &Node {
        &self.arena[r]
    }

    pub(crate) fn live_nodes(&self) -> usize {
        self.arena.live_nodes()
    }

    pub(crate) fn height(&self) -> usize {
        let mut height = 1;
        let mut node = self.root;
        while !self.arena[node].is_leaf() {
            node = self.arena[node].children[0];
            height += 1;
        }
        height
    }

    #[inline]
    pub(crate) fn entry(&self, slot: Slot) -> Entry {
        self.arena[slot.node].entries[slot.index]
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Entry whose boundary is `id`, or the smallest boundary above it.
    ///
    /// With `touch` set, every node on the descent has its access stamp
    /// refreshed. This is done through `&self` on purpose: readers share
    /// the lock and the stamps are advisory.
    pub(crate) fn seek(&self, id: ObjectId, touch: bool) -> Option<Slot> {
        let now = if touch { self.now() } else { 0 };
        let mut node = self.root;
        let mut candidate = None;
        loop {
            let n = &self.arena[node];
            if touch {
                n.touch(now);
            }
            match n.search(id) {
                Ok(index) => return Some(Slot::new(node, index)),
                Err(index) => {
                    if index < n.len() {
                        candidate = Some(Slot::new(node, index));
                    }
                    if n.is_leaf() {
                        return candidate;
                    }
                    node = n.children[index];
                }
            }
        }
    }

    pub(crate) fn find_exact(&self, id: ObjectId) -> Option<Slot> {
        self.seek(id, false)
            .filter(|&slot| self.entry(slot).boundary == id)
    }

    /// Owner of the range containing `id`.
    pub(crate) fn owner_of(&self, id: ObjectId) -> OwnerId {
        self.seek(id, false)
            .map_or(INVALID_OWNER, |slot| self.entry(slot).owner)
    }

    /// Largest entry with a boundary strictly below `id`.
    pub(crate) fn predecessor(&self, id: ObjectId) -> Option<Entry> {
        let slot = self.seek(id, false)?;
        self.prev_slot(slot).map(|s| self.entry(s))
    }

    /// Smallest entry with a boundary strictly above `id`.
    pub(crate) fn successor(&self, id: ObjectId) -> Option<Entry> {
        let slot = self.seek(id, false)?;
        if self.entry(slot).boundary == id {
            self.next_slot(slot).map(|s| self.entry(s))
        } else {
            Some(self.entry(slot))
        }
    }

    /// In-order successor of the entry at `slot`.
    pub(crate) fn next_slot(&self, slot: Slot) -> Option<Slot> {
        let n = &self.arena[slot.node];
        if !n.is_leaf() {
            let leaf = self.leftmost_leaf(n.children[slot.index + 1]);
            return Some(Slot::new(leaf, 0));
        }
        if slot.index + 1 < n.len() {
            return Some(Slot::new(slot.node, slot.index + 1));
        }

        // Last entry of a leaf: climb until we arrive from a child that has
        // a separator to its right.
        let mut child = slot.node;
        let mut parent = n.parent;
        while !parent.is_null() {
            let p = &self.arena[parent];
            let ci = p.child_index(child)?;
            if ci < p.len() {
                return Some(Slot::new(parent, ci));
            }
            child = parent;
            parent = p.parent;
        }
        None
    }

    /// In-order predecessor of the entry at `slot`.
    pub(crate) fn prev_slot(&self, slot: Slot) -> Option<Slot> {
        let n = &self.arena[slot.node];
        if !n.is_leaf() {
            let leaf = self.rightmost_leaf(n.children[slot.index]);
            return Some(Slot::new(leaf, self.arena[leaf].len() - 1));
        }
        if slot.index > 0 {
            return Some(Slot::new(slot.node, slot.index - 1));
        }

        let mut child = slot.node;
        let mut parent = n.parent;
        while !parent.is_null() {
            let p = &self.arena[parent];
            let ci = p.child_index(child)?;
            if ci > 0 {
                return Some(Slot::new(parent, ci - 1));
            }
            child = parent;
            parent = p.parent;
        }
        None
    }

    fn leftmost_leaf(&self, mut node: NodeRef) -> NodeRef {
        while !self.arena[node].is_leaf() {
            node = self.arena[node].children[0];
        }
        node
    }

    fn rightmost_leaf(&self, mut node: NodeRef) -> NodeRef {
        while !self.arena[node].is_leaf() {
            let n = &self.arena[node];
            node = n.children[n.children.len() - 1];
        }
        node
    }

    /// All entries in boundary order, sentinel included.
    pub(crate) fn entries(&self) -> Vec<Entry> {
        let mut out = Vec::with_capacity(self.count);
        self.collect_entries(self.root, &mut out);
        out
    }

    fn collect_entries(&self, node: NodeRef, out: &mut Vec<Entry>) {
        let n = &self.arena[node];
        for (i, entry) in n.entries.iter().enumerate() {
            if !n.is_leaf() {
                self.collect_entries(n.children[i], out);
            }
            out.push(*entry);
        }
        if !n.is_leaf() {
            self.collect_entries(n.children[n.len()], out);
        }
    }

    // =========================================================================
    // Insertion
    // =========================================================================

    /// Insert `id -> owner`, or overwrite the owner if `id` is already a
    /// boundary. Returns the previous owner on overwrite.
    ///
    /// Nodes on the path are touched so that freshly cached ranges are not
    /// swept out through a stale ancestor.
    pub(crate) fn create_or_replace_entry(&mut self, id: ObjectId, owner: OwnerId) -> Option<OwnerId> {
        let now = self.now();
        let mut node = self.root;
        loop {
            let n = &mut self.arena[node];
            n.touch(now);
            match n.search(id) {
                Ok(index) => {
                    let previous = n.entries[index].owner;
                    n.entries[index].owner = owner;
                    return Some(previous);
                }
                Err(index) if n.is_leaf() => {
                    n.entries.insert(index, Entry::new(id, owner));
                    self.count += 1;
                    if self.arena[node].len() > self.max_entries {
                        self.split(node, now);
                    }
                    return None;
                }
                Err(index) => node = n.children[index],
            }
        }
    }

    /// Split `node` around its median, pushing the median into the parent
    /// and repeating upwards while parents overflow.
    fn split(&mut self, mut node: NodeRef, now: u64) {
        while self.arena[node].len() > self.max_entries {
            let n = &mut self.arena[node];
            let mid = n.len() / 2;
            let right_entries: Entries = n.entries.drain(mid + 1..).collect();
            let right_children: Children = if n.is_leaf() {
                Children::new()
            } else {
                n.children.drain(mid + 1..).collect()
            };
            let median = n.entries.remove(mid);
            let parent = n.parent;

            let mut right = Node::new(parent, now);
            right.entries = right_entries;
            right.children = right_children;
            let right = self.arena.alloc(right);
            self.adopt_children(right, 0);

            if parent.is_null() {
                // Root split: the tree grows by one level.
                let mut root = Node::new(NodeRef::null(), now);
                root.entries.push(median);
                root.children.push(node);
                root.children.push(right);
                let root = self.arena.alloc(root);
                self.arena[node].parent = root;
                self.arena[right].parent = root;
                self.root = root;
                return;
            }

            let ci = self.index_in_parent(node, parent);
            let p = &mut self.arena[parent];
            p.entries.insert(ci, median);
            p.children.insert(ci + 1, right);
            node = parent;
        }
    }

    /// Point the parent link of `node`'s children from `from` onwards at `node`.
    fn adopt_children(&mut self, node: NodeRef, from: usize) {
        for i in from..self.arena[node].children.len() {
            let child = self.arena[node].children[i];
            self.arena[child].parent = node;
        }
    }

    fn index_in_parent(&self, node: NodeRef, parent: NodeRef) -> usize {
        match self.arena[parent].child_index(node) {
            Some(index) => index,
            None => panic!("corrupted cache tree: {node:?} is not a child of {parent:?}"),
        }
    }

    // =========================================================================
    // Deletion
    // =========================================================================

    /// Remove the boundary `id`. Returns `false` if it was not present.
    ///
    /// The sentinel can never be removed.
    pub(crate) fn remove(&mut self, id: ObjectId) -> bool {
        if id == ID_MAX {
            return false;
        }
        let Some(slot) = self.find_exact(id) else {
            return false;
        };

        let leaf = if self.arena[slot.node].is_leaf() {
            self.arena[slot.node].entries.remove(slot.index);
            slot.node
        } else {
            // Swap in the in-order predecessor, then fix up its leaf.
            let leaf = self.rightmost_leaf(self.arena[slot.node].children[slot.index]);
            let last = self.arena[leaf].len() - 1;
            let replacement = self.arena[leaf].entries.remove(last);
            self.arena[slot.node].entries[slot.index] = replacement;
            leaf
        };

        self.count -= 1;
        self.rebalance(leaf);
        true
    }

    /// Restore the minimum fill of `node` and its ancestors.
    fn rebalance(&mut self, mut node: NodeRef) {
        loop {
            let parent = self.arena[node].parent;
            if parent.is_null() {
                self.collapse_root();
                return;
            }
            if self.arena[node].len() >= self.min_entries {
                return;
            }

            let ci = self.index_in_parent(node, parent);
            let p = &self.arena[parent];
            let left = (ci > 0).then(|| p.children[ci - 1]);
            let right = (ci + 1 < p.children.len()).then(|| p.children[ci + 1]);

            if let Some(right) = right.filter(|&r| self.arena[r].len() > self.min_entries) {
                self.borrow_from_right(node, parent, ci, right);
                return;
            }
            if let Some(left) = left.filter(|&l| self.arena[l].len() > self.min_entries) {
                self.borrow_from_left(node, parent, ci, left);
                return;
            }

            match (left, right) {
                (_, Some(right)) => self.merge(node, parent, ci, right),
                (Some(left), None) => self.merge(left, parent, ci - 1, node),
                (None, None) => return,
            }
            node = parent;
        }
    }

    /// Rotate the first entry of `right` through the separator into `node`.
    fn borrow_from_right(&mut self, node: NodeRef, parent: NodeRef, ci: usize, right: NodeRef) {
        let lent = self.arena[right].entries.remove(0);
        let separator = mem::replace(&mut self.arena[parent].entries[ci], lent);
        self.arena[node].entries.push(separator);

        if !self.arena[right].is_leaf() {
            let child = self.arena[right].children.remove(0);
            self.arena[node].children.push(child);
            self.arena[child].parent = node;
        }
    }

    /// Rotate the last entry of `left` through the separator into `node`.
    fn borrow_from_left(&mut self, node: NodeRef, parent: NodeRef, ci: usize, left: NodeRef) {
        let last = self.arena[left].len() - 1;
        let lent = self.arena[left].entries.remove(last);
        let separator = mem::replace(&mut self.arena[parent].entries[ci - 1], lent);
        self.arena[node].entries.insert(0, separator);

        if !self.arena[left].is_leaf() {
            let last_child = self.arena[left].children.len() - 1;
            let child = self.arena[left].children.remove(last_child);
            self.arena[node].children.insert(0, child);
            self.arena[child].parent = node;
        }
    }

    /// Fold separator `sep` of `parent` and all of `right` into `left`.
    fn merge(&mut self, left: NodeRef, parent: NodeRef, sep: usize, right: NodeRef) {
        let p = &mut self.arena[parent];
        let separator = p.entries.remove(sep);
        p.children.remove(sep + 1);

        let r = &mut self.arena[right];
        let entries = mem::take(&mut r.entries);
        let children = mem::take(&mut r.children);
        self.arena.free(right);

        let l = &mut self.arena[left];
        let first_moved = l.children.len();
        l.entries.push(separator);
        l.entries.extend(entries);
        l.children.extend(children);
        self.adopt_children(left, first_moved);
    }

    /// Drop an entry-less root, promoting its only child.
    fn collapse_root(&mut self) {
        let root = self.root;
        let r = &self.arena[root];
        if r.len() == 0 && r.children.len() == 1 {
            let child = r.children[0];
            self.arena.free(root);
            self.arena[child].parent = NodeRef::null();
            self.root = child;
        }
    }
}
