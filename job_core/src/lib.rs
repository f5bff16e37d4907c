//! Job-assignment acceleration engine for colony-style simulations.
//!
//! Work providers ask [`JobEngine::standard_try_give_job`] whether an agent
//! should receive a job. The engine runs cheap gating checks first and then
//! hands the provider a [`JobContext`] backed by per-map candidate caches,
//! distance bucketing and a reachability memo so that target searches stay
//! bounded on large maps.

mod buckets;
mod candidate_cache;
pub mod config;
mod eligibility;
mod hashing;
mod ids;
pub mod metrics;
mod pipeline;
mod reachability;
mod registry;
mod selector;
mod store;
mod world;

#[cfg(test)]
mod test_support;

use bevy::app::{App, Plugin, Update};

pub use buckets::{build_distance_buckets, DistanceBuckets};
pub use candidate_cache::{
    category_source, CachePolicy, CacheRead, CacheStats, CandidateCache, CandidateSource,
    CategorySource, RefreshStrategy,
};
pub use config::{
    load_engine_config_from_env, CacheConfig, ConfigError, EngineConfig, EngineConfigHandle,
    PipelineConfig, SearchConfig, JOB_ENGINE_CONFIG_ENV,
};
pub use eligibility::EligibilityCache;
pub use hashing::{selection_seed, FnvHasher};
pub use ids::{AgentId, CandidateId, MapId, ProviderId, WorkTag};
pub use metrics::{EngineMetrics, MapMetrics};
pub use pipeline::{
    DenyReason, JobContext, JobEngine, JobError, JobRequest, PipelineCounters, PipelineOutcome,
};
pub use reachability::{MemoScope, MemoStats, ReachabilityMemo};
pub use registry::{
    BypassCondition, DeactivationSet, ProviderMetadata, ProviderRegistry, ProviderReport,
    ProviderStats,
};
pub use selector::{select_first_valid, selection_rng, Validator};
pub use store::WorldCacheStore;
pub use world::{
    distance_squared, Agent, AgentFlags, DefaultHostPolicy, HostPolicy, WorldAccessor,
    WorldQueryError,
};

/// Inserts a [`JobEngine`] configured from the environment, the config
/// handle and [`EngineMetrics`], and samples metrics every update.
#[derive(Default)]
pub struct JobEnginePlugin;

impl Plugin for JobEnginePlugin {
    fn build(&self, app: &mut App) {
        let (config, _) = load_engine_config_from_env();
        app.insert_resource(EngineConfigHandle::new(config.clone()))
            .insert_resource(JobEngine::new(config))
            .init_resource::<EngineMetrics>()
            .add_systems(Update, metrics::collect_metrics);
    }
}
