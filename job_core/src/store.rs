use std::collections::BTreeSet;

use tracing::debug;

use crate::candidate_cache::{CachePolicy, CandidateCache, CandidateSource};
use crate::ids::{CandidateId, MapId, ProviderId};
use crate::reachability::ReachabilityMemo;
use crate::world::WorldAccessor;

/// Per-map candidate lists and reachability answers.
///
/// The two structures share a lifecycle: a candidate refresh drops the
/// matching memo region, and map teardown drops both.
#[derive(Debug)]
pub struct WorldCacheStore {
    candidates: CandidateCache,
    memo: ReachabilityMemo,
    maps: BTreeSet<MapId>,
}

impl WorldCacheStore {
    pub fn new(memo_max_entries_per_map: usize) -> Self {
        Self {
            candidates: CandidateCache::new(),
            memo: ReachabilityMemo::new(memo_max_entries_per_map),
            maps: BTreeSet::new(),
        }
    }

    /// Cached candidates for `provider` on `map`, refreshed when due. A
    /// refresh invalidates the provider's memo region on that map.
    pub fn candidates_for(
        &mut self,
        provider: &ProviderId,
        map: MapId,
        tick: u64,
        policy: &CachePolicy,
        source: &dyn CandidateSource,
        world: &dyn WorldAccessor,
    ) -> &[CandidateId] {
        self.maps.insert(map);
        let read = self
            .candidates
            .get_or_refresh(provider, map, tick, policy, source, world);
        if read.refreshed {
            self.memo.invalidate_region(map, provider);
        }
        read.items
    }

    pub fn on_map_finalized(&mut self, map: MapId) {
        self.maps.insert(map);
        self.memo.ensure_map(map);
    }

    pub fn on_map_removed(&mut self, map: MapId) {
        let entries = self.candidates.clear_map(map);
        let had_memo = self.memo.drop_map(map);
        self.maps.remove(&map);
        debug!(
            target: "job_core::cache",
            %map,
            entries,
            had_memo,
            "store.map_removed"
        );
    }

    pub fn clear(&mut self) {
        self.candidates.clear();
        self.memo.clear();
        self.maps.clear();
    }

    pub fn candidate_cache(&self) -> &CandidateCache {
        &self.candidates
    }

    pub fn candidate_cache_mut(&mut self) -> &mut CandidateCache {
        &mut self.candidates
    }

    pub fn memo(&self) -> &ReachabilityMemo {
        &self.memo
    }

    pub fn memo_mut(&mut self) -> &mut ReachabilityMemo {
        &mut self.memo
    }

    pub fn maps(&self) -> impl Iterator<Item = MapId> + '_ {
        self.maps.iter().copied()
    }
}
