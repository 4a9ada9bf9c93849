//! Coalescing cache policy on top of the raw tree.
//!
//! A boundary `b -> o` claims the ids after the previous boundary up to and
//! including `b` for `o`. Caching a range rewrites that claim for exactly
//! `[start, end]`: the left edge is fenced so earlier ids keep their owner,
//! interior boundaries are dropped, and the new boundaries are coalesced
//! with neighbours naming the same owner. Keeping neighbours distinct means
//! the entry count tracks the number of distinct ranges, not the number of
//! cached accesses.
//!
//! Invalidation is the same operation with [`INVALID_OWNER`] as the owner.

use tracing::{debug, trace};

use crate::tree::Tree;
use crate::{ObjectId, OwnerId, RangeInfo, ID_MAX, INVALID_OWNER};

impl Tree {
    /// Claim `[start, end]` for `owner`.
    ///
    /// Returns `false` without touching the tree if `start > end`, or if the
    /// range would hand the reserved `ID_MAX` to a real owner.
    pub(crate) fn cache_range(&mut self, start: ObjectId, end: ObjectId, owner: OwnerId) -> bool {
        if start > end || (end == ID_MAX && owner != INVALID_OWNER) {
            debug!(start, end, owner, "rejected range");
            return false;
        }

        self.fence_left(start);
        self.remove_entries_within_range(start, end);
        let previous = self.create_or_replace_entry(end, owner);
        self.merge_with_predecessor(start, owner);
        self.merge_with_successor(end, owner);

        trace!(start, end, owner, ?previous, size = self.size(), "cached range");
        true
    }

    /// Make sure a boundary sits at `start - 1` so the ids before `start`
    /// keep the owner they have now. With nothing cached to the left this
    /// places an `INVALID_OWNER` barrier.
    fn fence_left(&mut self, start: ObjectId) {
        if start == 0 {
            return;
        }
        let edge = start - 1;
        if self.find_exact(edge).is_none() {
            let interim = self.owner_of(edge);
            self.create_or_replace_entry(edge, interim);
        }
    }

    /// Drop every boundary in `[start, end)`; they are interior to the
    /// claimed range and a single entry at `end` describes it.
    fn remove_entries_within_range(&mut self, start: ObjectId, end: ObjectId) {
        while let Some(slot) = self.seek(start, false) {
            let boundary = self.entry(slot).boundary;
            if boundary >= end {
                break;
            }
            self.remove(boundary);
        }
    }

    /// Coalesce with the fence at `start - 1` if it names the same owner.
    fn merge_with_predecessor(&mut self, start: ObjectId, owner: OwnerId) {
        if start == 0 {
            return;
        }
        let edge = start - 1;
        if let Some(slot) = self.find_exact(edge) {
            if self.entry(slot).owner == owner {
                self.remove(edge);
            }
        }
    }

    /// Coalesce `end` into the following range if it names the same owner.
    fn merge_with_successor(&mut self, end: ObjectId, owner: OwnerId) {
        if let Some(next) = self.successor(end) {
            if next.owner == owner {
                self.remove(end);
            }
        }
    }

    /// Owner of `id`, refreshing the access stamps along the way.
    pub(crate) fn primary_peer(&self, id: ObjectId) -> OwnerId {
        self.seek(id, true).map_or(INVALID_OWNER, |slot| self.entry(slot).owner)
    }

    /// Owner and bounds of the range containing `id`, if it is cached.
    pub(crate) fn metadata(&self, id: ObjectId) -> Option<RangeInfo> {
        let slot = self.seek(id, true)?;
        let matched = self.entry(slot);
        if matched.owner == INVALID_OWNER {
            return None;
        }
        let start = self
            .prev_slot(slot)
            .map_or(0, |prev| self.entry(prev).boundary + 1);
        Some(RangeInfo {
            owner: matched.owner,
            start,
            end: matched.boundary,
        })
    }

    /// Forget the owner of `id` alone, leaving its neighbours cached.
    pub(crate) fn invalidate_chunk_id(&mut self, id: ObjectId) {
        if self.owner_of(id) != INVALID_OWNER {
            self.cache_range(id, id, INVALID_OWNER);
        }
    }

    /// Forget the whole cached range containing `id`. Returns the range
    /// that was dropped.
    pub(crate) fn invalidate_range(&mut self, id: ObjectId) -> Option<RangeInfo> {
        let slot = self.seek(id, false)?;
        let matched = self.entry(slot);
        if matched.owner == INVALID_OWNER {
            return None;
        }
        let start = self
            .prev_slot(slot)
            .map_or(0, |prev| self.entry(prev).boundary + 1);
        self.cache_range(start, matched.boundary, INVALID_OWNER);
        Some(RangeInfo {
            owner: matched.owner,
            start,
            end: matched.boundary,
        })
    }

    /// Drop every range claimed by `owner`. Returns how many were dropped.
    pub(crate) fn invalidate_peer(&mut self, owner: OwnerId) -> usize {
        if owner == INVALID_OWNER {
            return 0;
        }
        let boundaries: Vec<ObjectId> = self
            .entries()
            .into_iter()
            .filter(|e| e.owner == owner)
            .map(|e| e.boundary)
            .collect();

        let mut dropped = 0;
        for boundary in boundaries {
            if self.owner_of(boundary) == owner && self.invalidate_range(boundary).is_some() {
                dropped += 1;
            }
        }
        debug!(owner, dropped, "invalidated peer");
        dropped
    }
}
