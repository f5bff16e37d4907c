//! Per-provider, per-map candidate lists with bounded staleness.
//!
//! An entry is rebuilt once `refresh_interval_ticks` have elapsed since its
//! last refresh. Sources that enumerate a large universe can opt into a
//! progressive strategy: a few spatial partitions are rescanned per elapsed
//! tick and folded into the served list straight away, and any partition
//! older than one interval is rescanned before the list is served.

use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, warn};

use crate::ids::{CandidateId, MapId, ProviderId, WorkTag};
use crate::world::{WorldAccessor, WorldQueryError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshStrategy {
    /// Enumerate every matching candidate in one call.
    Full,
    /// Spread enumeration over the world's spatial partitions.
    Progressive,
}

/// Freshness and size limits applied to one cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    pub refresh_interval_ticks: u64,
    pub max_size: usize,
    /// Lower bound on partitions rescanned per elapsed tick.
    pub min_partitions_per_tick: usize,
}

impl CachePolicy {
    pub fn new(refresh_interval_ticks: u64, max_size: usize) -> Self {
        Self {
            refresh_interval_ticks,
            max_size,
            min_partitions_per_tick: 1,
        }
    }
}

/// Where a provider's candidates come from.
pub trait CandidateSource {
    fn category(&self) -> &WorkTag;

    fn strategy(&self) -> RefreshStrategy {
        RefreshStrategy::Full
    }

    /// Provider-specific filter applied to live candidates during refresh.
    fn accepts(&self, _world: &dyn WorldAccessor, _candidate: CandidateId) -> bool {
        true
    }

    /// Reorders a fresh snapshot before it is truncated to `max_size`.
    fn order(&self, _world: &dyn WorldAccessor, _items: &mut Vec<CandidateId>) {}
}

/// [`CandidateSource`] built from a category and a filter closure.
pub struct CategorySource<F> {
    category: WorkTag,
    strategy: RefreshStrategy,
    filter: F,
}

impl<F> CategorySource<F>
where
    F: Fn(&dyn WorldAccessor, CandidateId) -> bool,
{
    pub fn new(category: impl Into<WorkTag>, filter: F) -> Self {
        Self {
            category: category.into(),
            strategy: RefreshStrategy::Full,
            filter,
        }
    }

    pub fn progressive(mut self) -> Self {
        self.strategy = RefreshStrategy::Progressive;
        self
    }
}

impl<F> CandidateSource for CategorySource<F>
where
    F: Fn(&dyn WorldAccessor, CandidateId) -> bool,
{
    fn category(&self) -> &WorkTag {
        &self.category
    }

    fn strategy(&self) -> RefreshStrategy {
        self.strategy
    }

    fn accepts(&self, world: &dyn WorldAccessor, candidate: CandidateId) -> bool {
        (self.filter)(world, candidate)
    }
}

/// Every live candidate of a category.
pub fn category_source(
    category: impl Into<WorkTag>,
) -> CategorySource<fn(&dyn WorldAccessor, CandidateId) -> bool> {
    fn accept_all(_world: &dyn WorldAccessor, _candidate: CandidateId) -> bool {
        true
    }
    CategorySource::new(category, accept_all as fn(&dyn WorldAccessor, CandidateId) -> bool)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub refreshes: u64,
    pub failed_refreshes: u64,
    pub truncated_candidates: u64,
    pub partitions_scanned: u64,
}

#[derive(Debug, Clone, Default)]
struct PartitionSlot {
    items: Vec<CandidateId>,
    scanned_tick: u64,
}

/// Rolling state of a progressive entry. Each partition keeps its own
/// slice of the served list and replaces it whenever it is rescanned.
#[derive(Debug)]
struct ProgressiveState {
    slots: Vec<PartitionSlot>,
    cursor: usize,
    last_step_tick: u64,
    /// Partition scans since the last completed refresh.
    cycle_scanned: usize,
    /// Staging pauses after a failed scan until the slots go stale.
    failed: bool,
}

impl ProgressiveState {
    fn new(partition_count: usize, tick: u64) -> Self {
        Self {
            slots: vec![
                PartitionSlot {
                    items: Vec::new(),
                    scanned_tick: tick,
                };
                partition_count.max(1)
            ],
            cursor: 0,
            last_step_tick: tick,
            cycle_scanned: 0,
            failed: false,
        }
    }

    /// Partitions to rescan at `tick`: the paced round-robin share for the
    /// elapsed ticks, plus every slot older than one interval.
    fn due_partitions(&mut self, tick: u64, interval: u64, per_tick: usize) -> Vec<usize> {
        let count = self.slots.len();
        let mut due = Vec::new();
        if !self.failed {
            let elapsed = tick.saturating_sub(self.last_step_tick) as usize;
            let budget = per_tick.saturating_mul(elapsed).min(count);
            for _ in 0..budget {
                due.push(self.cursor);
                self.cursor = (self.cursor + 1) % count;
            }
        }
        for (index, slot) in self.slots.iter().enumerate() {
            if tick.saturating_sub(slot.scanned_tick) >= interval && !due.contains(&index) {
                due.push(index);
            }
        }
        self.last_step_tick = self.last_step_tick.max(tick);
        due
    }

    fn served(&self) -> Vec<CandidateId> {
        self.slots
            .iter()
            .flat_map(|slot| slot.items.iter().copied())
            .collect()
    }

    fn poison(&mut self, tick: u64) {
        for slot in &mut self.slots {
            slot.items.clear();
            slot.scanned_tick = tick;
        }
        self.cycle_scanned = 0;
        self.failed = true;
    }
}

#[derive(Debug)]
struct CacheEntry {
    items: Vec<CandidateId>,
    last_refresh_tick: Option<u64>,
    refresh_interval_ticks: u64,
    max_size: usize,
    progressive: Option<ProgressiveState>,
    stats: CacheStats,
}

impl CacheEntry {
    fn cold(policy: &CachePolicy) -> Self {
        Self {
            items: Vec::new(),
            last_refresh_tick: None,
            refresh_interval_ticks: policy.refresh_interval_ticks,
            max_size: policy.max_size,
            progressive: None,
            stats: CacheStats::default(),
        }
    }

    fn is_due(&self, tick: u64) -> bool {
        match self.last_refresh_tick {
            None => true,
            Some(last) => tick.saturating_sub(last) >= self.refresh_interval_ticks,
        }
    }

    fn mark_refreshed(&mut self, tick: u64) {
        let advanced = self.last_refresh_tick.map_or(tick, |last| last.max(tick));
        self.last_refresh_tick = Some(advanced);
        self.stats.refreshes += 1;
    }

    /// Orders and truncates a new served list. Truncation is only counted
    /// for lists that complete a refresh.
    fn install(
        &mut self,
        mut items: Vec<CandidateId>,
        source: &dyn CandidateSource,
        world: &dyn WorldAccessor,
        count_truncation: bool,
    ) {
        self.items.clear();
        source.order(world, &mut items);
        if items.len() > self.max_size {
            if count_truncation {
                self.stats.truncated_candidates += (items.len() - self.max_size) as u64;
            }
            items.truncate(self.max_size);
        }
        self.items = items;
    }
}

/// Result of a cache lookup.
#[derive(Debug)]
pub struct CacheRead<'a> {
    pub items: &'a [CandidateId],
    /// True when this lookup completed a refresh of the whole entry.
    pub refreshed: bool,
}

#[derive(Debug, Default)]
pub struct CandidateCache {
    entries: HashMap<(ProviderId, MapId), CacheEntry>,
}

impl CandidateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the provider's candidates on `map`, refreshing first when the
    /// entry is cold or its interval has elapsed.
    pub fn get_or_refresh(
        &mut self,
        provider: &ProviderId,
        map: MapId,
        tick: u64,
        policy: &CachePolicy,
        source: &dyn CandidateSource,
        world: &dyn WorldAccessor,
    ) -> CacheRead<'_> {
        let entry = self
            .entries
            .entry((provider.clone(), map))
            .or_insert_with(|| CacheEntry::cold(policy));
        entry.refresh_interval_ticks = policy.refresh_interval_ticks;
        entry.max_size = policy.max_size;

        let refreshed = match source.strategy() {
            RefreshStrategy::Full => {
                if entry.is_due(tick) {
                    full_refresh(entry, provider, map, tick, source, world);
                    true
                } else {
                    false
                }
            }
            RefreshStrategy::Progressive => {
                progressive_refresh(entry, provider, map, tick, policy, source, world)
            }
        };

        CacheRead {
            items: &entry.items,
            refreshed,
        }
    }

    /// Forces the next lookup for this entry to rebuild from scratch.
    pub fn invalidate(&mut self, provider: &ProviderId, map: MapId) {
        if let Some(entry) = self.entries.get_mut(&(provider.clone(), map)) {
            entry.items.clear();
            entry.last_refresh_tick = None;
            entry.progressive = None;
        }
    }

    pub fn clear_map(&mut self, map: MapId) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(_, entry_map), _| *entry_map != map);
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn items(&self, provider: &ProviderId, map: MapId) -> Option<&[CandidateId]> {
        self.entries
            .get(&(provider.clone(), map))
            .map(|entry| entry.items.as_slice())
    }

    pub fn last_refresh_tick(&self, provider: &ProviderId, map: MapId) -> Option<u64> {
        self.entries
            .get(&(provider.clone(), map))
            .and_then(|entry| entry.last_refresh_tick)
    }

    pub fn stats(&self, provider: &ProviderId, map: MapId) -> Option<CacheStats> {
        self.entries
            .get(&(provider.clone(), map))
            .map(|entry| entry.stats)
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    pub fn entries_for_map(&self, map: MapId) -> usize {
        self.entries.keys().filter(|(_, m)| *m == map).count()
    }
}

fn live_and_accepted<'a>(
    raw: Vec<CandidateId>,
    source: &'a dyn CandidateSource,
    world: &'a dyn WorldAccessor,
) -> impl Iterator<Item = CandidateId> + 'a {
    raw.into_iter()
        .filter(move |candidate| world.is_live(*candidate) && source.accepts(world, *candidate))
}

fn report_failure(provider: &ProviderId, map: MapId, tick: u64, err: &WorldQueryError) {
    warn!(
        target: "job_core::cache",
        %provider,
        %map,
        tick,
        error = %err,
        "cache.refresh_failed"
    );
}

fn full_refresh(
    entry: &mut CacheEntry,
    provider: &ProviderId,
    map: MapId,
    tick: u64,
    source: &dyn CandidateSource,
    world: &dyn WorldAccessor,
) {
    entry.progressive = None;
    match world.enumerate_candidates(map, source.category()) {
        Ok(raw) => {
            let items: Vec<_> = live_and_accepted(raw, source, world).collect();
            entry.install(items, source, world, true);
            debug!(
                target: "job_core::cache",
                %provider,
                %map,
                tick,
                candidates = entry.items.len(),
                "cache.refreshed=full"
            );
        }
        Err(err) => {
            report_failure(provider, map, tick, &err);
            entry.items.clear();
            entry.stats.failed_refreshes += 1;
        }
    }
    entry.mark_refreshed(tick);
}

/// Rolling refresh: a few partitions are rescanned per elapsed tick and
/// folded into the served list right away, so no partition's contents are
/// older than one interval. Returns true when a full cycle of partitions
/// completed (or failed) on this lookup.
fn progressive_refresh(
    entry: &mut CacheEntry,
    provider: &ProviderId,
    map: MapId,
    tick: u64,
    policy: &CachePolicy,
    source: &dyn CandidateSource,
    world: &dyn WorldAccessor,
) -> bool {
    let partition_count = world.partition_count(map).max(1);
    let interval = entry.refresh_interval_ticks;
    if entry
        .progressive
        .as_ref()
        .is_some_and(|state| state.slots.len() != partition_count)
    {
        entry.progressive = None;
    }
    let cold = entry.progressive.is_none() || entry.last_refresh_tick.is_none();
    let state = entry
        .progressive
        .get_or_insert_with(|| ProgressiveState::new(partition_count, tick));

    let due = if cold {
        state.last_step_tick = tick;
        (0..partition_count).collect()
    } else {
        let per_tick = partition_count
            .div_ceil(interval.max(1) as usize)
            .max(policy.min_partitions_per_tick.max(1));
        state.due_partitions(tick, interval, per_tick)
    };
    if due.is_empty() {
        return false;
    }

    let mut failure = None;
    for partition in due {
        entry.stats.partitions_scanned += 1;
        match world.enumerate_partition(map, source.category(), partition) {
            Ok(raw) => {
                let slot = &mut state.slots[partition];
                slot.items.clear();
                slot.items.extend(live_and_accepted(raw, source, world));
                slot.scanned_tick = tick;
                state.cycle_scanned += 1;
            }
            Err(err) => {
                failure = Some(err);
                break;
            }
        }
    }

    if let Some(err) = failure {
        report_failure(provider, map, tick, &err);
        state.poison(tick);
        entry.items.clear();
        entry.stats.failed_refreshes += 1;
        entry.mark_refreshed(tick);
        return true;
    }

    let completed = state.cycle_scanned >= partition_count;
    if completed {
        state.cycle_scanned = 0;
        state.failed = false;
    }
    let served = state.served();
    entry.install(served, source, world, completed);
    if completed {
        debug!(
            target: "job_core::cache",
            %provider,
            %map,
            tick,
            candidates = entry.items.len(),
            "cache.refreshed=progressive"
        );
        entry.mark_refreshed(tick);
    }
    completed
}
