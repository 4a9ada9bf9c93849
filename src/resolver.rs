//! Cache-fronted ownership resolution.
//!
//! [`LookupResolver`] answers "which node owns this id" from a
//! [`CacheTree`] when it can and falls back to a [`Coordinator`] otherwise,
//! caching whatever the coordinator reports. Coordinators describe ranges in
//! the creator-local id space; answers are re-based onto the creator of the
//! id that was asked about before they are cached or returned.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::{creator_of, with_creator, CacheTree, ObjectId, OwnerId, RangeInfo, INVALID_OWNER};

/// Authoritative source of ownership ranges.
pub trait Coordinator {
    /// Range containing `id`, with `start` and `end` local to the creator of
    /// `id`. `None` if the coordinator does not know the id.
    fn lookup_range(&self, id: ObjectId) -> Option<RangeInfo>;
}

impl<C: Coordinator + ?Sized> Coordinator for Arc<C> {
    fn lookup_range(&self, id: ObjectId) -> Option<RangeInfo> {
        (**self).lookup_range(id)
    }
}

/// Resolves owners through an optional cache in front of a coordinator.
pub struct LookupResolver<C> {
    cache: Option<Arc<CacheTree>>,
    coordinator: C,
}

impl<C: Coordinator> LookupResolver<C> {
    /// Resolve through `cache`, filling it from `coordinator` on a miss.
    pub fn new(cache: Arc<CacheTree>, coordinator: C) -> Self {
        Self {
            cache: Some(cache),
            coordinator,
        }
    }

    /// Resolve every request through `coordinator` directly.
    pub fn uncached(coordinator: C) -> Self {
        Self {
            cache: None,
            coordinator,
        }
    }

    /// The cache in front of the coordinator, if any.
    pub fn cache(&self) -> Option<&Arc<CacheTree>> {
        self.cache.as_ref()
    }

    /// Owner of `id`, or [`INVALID_OWNER`] if nobody knows it.
    pub fn primary_peer(&self, id: ObjectId) -> OwnerId {
        if let Some(cache) = &self.cache {
            let owner = cache.get_primary_peer(id);
            if owner != INVALID_OWNER {
                trace!(id, owner, "lookup cache hit");
                return owner;
            }
        }
        self.fetch(id).map_or(INVALID_OWNER, |range| range.owner)
    }

    /// Owner and bounds of the range containing `id`.
    pub fn lookup_range(&self, id: ObjectId) -> Option<RangeInfo> {
        if let Some(range) = self.cache.as_ref().and_then(|cache| cache.get_metadata(id)) {
            trace!(id, owner = range.owner, "lookup cache hit");
            return Some(range);
        }
        self.fetch(id)
    }

    /// Ask the coordinator and cache a usable answer.
    fn fetch(&self, id: ObjectId) -> Option<RangeInfo> {
        let local = self.coordinator.lookup_range(id)?;
        if local.owner == INVALID_OWNER || local.start > local.end {
            debug!(id, owner = local.owner, "coordinator returned no usable range");
            return None;
        }

        let creator = creator_of(id);
        let range = RangeInfo {
            owner: local.owner,
            start: with_creator(creator, local.start),
            end: with_creator(creator, local.end),
        };
        if !range.contains(id) {
            debug!(id, start = range.start, end = range.end, "coordinator range misses id");
            return None;
        }

        if let Some(cache) = &self.cache {
            cache.cache_range(range.start, range.end, range.owner);
        }
        trace!(id, owner = range.owner, start = range.start, end = range.end, "resolved via coordinator");
        Some(range)
    }

    /// `id` moved or was removed.
    pub fn invalidate(&self, id: ObjectId) {
        if let Some(cache) = &self.cache {
            cache.invalidate_chunk_id(id);
        }
    }

    /// Every id in `ids` moved or was removed.
    pub fn invalidate_all(&self, ids: &[ObjectId]) {
        if let Some(cache) = &self.cache {
            for &id in ids {
                cache.invalidate_chunk_id(id);
            }
        }
    }

    /// The whole range containing `id` is no longer valid.
    pub fn invalidate_range(&self, id: ObjectId) {
        if let Some(cache) = &self.cache {
            cache.invalidate_range(id);
        }
    }

    /// `owner` failed; forget everything it claimed.
    pub fn on_node_failure(&self, owner: OwnerId) {
        if let Some(cache) = &self.cache {
            let dropped = cache.invalidate_peer(owner);
            debug!(owner, dropped, "dropped ranges of failed node");
        }
    }
}
