//! Bounded memo of validator outcomes, one region per `(map, provider)`.
//!
//! The memo never runs a validator itself. Once a map reaches its entry cap
//! new answers are simply not stored; nothing is evicted.

use std::collections::HashMap;

use serde::Serialize;

use crate::ids::{CandidateId, MapId, ProviderId};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemoStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub rejected_inserts: u64,
}

#[derive(Debug, Default)]
struct MapMemo {
    regions: HashMap<ProviderId, HashMap<CandidateId, bool>>,
    len: usize,
    hits: u64,
    misses: u64,
    rejected_inserts: u64,
}

#[derive(Debug)]
pub struct ReachabilityMemo {
    maps: HashMap<MapId, MapMemo>,
    max_entries_per_map: usize,
}

impl ReachabilityMemo {
    pub fn new(max_entries_per_map: usize) -> Self {
        Self {
            maps: HashMap::new(),
            max_entries_per_map,
        }
    }

    pub fn max_entries_per_map(&self) -> usize {
        self.max_entries_per_map
    }

    pub fn ensure_map(&mut self, map: MapId) {
        self.maps.entry(map).or_default();
    }

    pub fn try_get(
        &mut self,
        map: MapId,
        provider: &ProviderId,
        candidate: CandidateId,
    ) -> Option<bool> {
        let memo = self.maps.entry(map).or_default();
        let value = memo
            .regions
            .get(provider)
            .and_then(|region| region.get(&candidate))
            .copied();
        match value {
            Some(_) => memo.hits += 1,
            None => memo.misses += 1,
        }
        value
    }

    /// Stores `value` unless the map is already at capacity. Returns whether
    /// the answer is now memoized.
    pub fn set(
        &mut self,
        map: MapId,
        provider: &ProviderId,
        candidate: CandidateId,
        value: bool,
    ) -> bool {
        let cap = self.max_entries_per_map;
        let memo = self.maps.entry(map).or_default();
        if let Some(existing) = memo
            .regions
            .get_mut(provider)
            .and_then(|region| region.get_mut(&candidate))
        {
            *existing = value;
            return true;
        }
        if memo.len >= cap {
            memo.rejected_inserts += 1;
            return false;
        }
        memo.regions
            .entry(provider.clone())
            .or_default()
            .insert(candidate, value);
        memo.len += 1;
        true
    }

    /// Drops every answer tied to one provider's candidate snapshot.
    pub fn invalidate_region(&mut self, map: MapId, provider: &ProviderId) {
        if let Some(memo) = self.maps.get_mut(&map) {
            if let Some(region) = memo.regions.remove(provider) {
                memo.len -= region.len();
            }
        }
    }

    pub fn drop_map(&mut self, map: MapId) -> bool {
        self.maps.remove(&map).is_some()
    }

    pub fn clear(&mut self) {
        self.maps.clear();
    }

    pub fn len(&self, map: MapId) -> usize {
        self.maps.get(&map).map(|memo| memo.len).unwrap_or(0)
    }

    pub fn is_empty(&self, map: MapId) -> bool {
        self.len(map) == 0
    }

    pub fn stats(&self, map: MapId) -> MemoStats {
        self.maps
            .get(&map)
            .map(|memo| MemoStats {
                entries: memo.len,
                hits: memo.hits,
                misses: memo.misses,
                rejected_inserts: memo.rejected_inserts,
            })
            .unwrap_or_default()
    }

    pub fn scope<'a>(&'a mut self, map: MapId, provider: &'a ProviderId) -> MemoScope<'a> {
        MemoScope {
            memo: self,
            map,
            provider,
        }
    }
}

/// One `(map, provider)` region, handed to the selector.
pub struct MemoScope<'a> {
    memo: &'a mut ReachabilityMemo,
    map: MapId,
    provider: &'a ProviderId,
}

impl MemoScope<'_> {
    pub fn try_get(&mut self, candidate: CandidateId) -> Option<bool> {
        self.memo.try_get(self.map, self.provider, candidate)
    }

    pub fn set(&mut self, candidate: CandidateId, value: bool) -> bool {
        self.memo.set(self.map, self.provider, candidate, value)
    }
}
