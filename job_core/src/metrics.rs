use bevy::prelude::*;
use serde::Serialize;

use crate::ids::MapId;
use crate::pipeline::{JobEngine, PipelineCounters};
use crate::reachability::MemoStats;
use crate::registry::ProviderReport;

#[derive(Debug, Clone, Serialize)]
pub struct MapMetrics {
    pub map: MapId,
    pub cache_entries: usize,
    pub memo: MemoStats,
    pub deactivated_providers: usize,
}

/// Point-in-time view of engine health, suitable for logging or dumping as
/// JSON.
#[derive(Resource, Debug, Clone, Default, Serialize)]
pub struct EngineMetrics {
    pub samples: u64,
    pub cache_entries: usize,
    pub maps: Vec<MapMetrics>,
    pub pipeline: PipelineCounters,
    pub providers: Vec<ProviderReport>,
}

impl EngineMetrics {
    pub fn capture(engine: &JobEngine) -> Self {
        let mut metrics = Self::default();
        metrics.update_from(engine);
        metrics
    }

    fn update_from(&mut self, engine: &JobEngine) {
        let store = engine.store();
        let cache = store.candidate_cache();
        self.cache_entries = cache.entry_count();
        self.maps = store
            .maps()
            .map(|map| MapMetrics {
                map,
                cache_entries: cache.entries_for_map(map),
                memo: store.memo().stats(map),
                deactivated_providers: engine.registry().deactivations().len(map),
            })
            .collect();
        self.pipeline = engine.counters();
        self.providers = engine.registry().report();
    }
}

pub fn collect_metrics(engine: Res<JobEngine>, mut metrics: ResMut<EngineMetrics>) {
    metrics.samples += 1;
    metrics.update_from(&engine);
}
