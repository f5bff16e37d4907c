//! Standardized entry point that decides whether an agent gets a job from a
//! provider this tick.
//!
//! Checks run cheapest first and each one can end the invocation:
//! availability, emergency preemption, eligibility, map-level suppression,
//! dependencies, provider preconditions. Only then is the provider's job
//! creator invoked, with failures and panics contained and one statistics
//! sample recorded.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use bevy::prelude::Resource;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, trace, warn};

use crate::buckets::{build_distance_buckets, DistanceBuckets};
use crate::candidate_cache::{CachePolicy, CandidateSource};
use crate::config::{load_engine_config_from_env, EngineConfig};
use crate::eligibility::EligibilityCache;
use crate::ids::{AgentId, CandidateId, MapId, ProviderId, WorkTag};
use crate::reachability::MemoScope;
use crate::registry::{ProviderMetadata, ProviderRegistry};
use crate::selector::{select_first_valid, selection_rng, Validator};
use crate::store::WorldCacheStore;
use crate::world::{Agent, HostPolicy, WorldAccessor, WorldQueryError};

/// Unexpected failure inside a job creator. "No target" is `Ok(None)`,
/// not an error.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("world query failed: {0}")]
    World(#[from] WorldQueryError),
    #[error("target {target} vanished during job creation")]
    TargetVanished { target: CandidateId },
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DenyReason {
    /// Drafted or downed.
    Unavailable,
    Emergency,
    Ineligible,
    MissingCapability,
    WorkSuppressed,
    ProviderInactive,
    DependencyUnsatisfied,
    Precondition,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome<J> {
    Denied(DenyReason),
    NoJob,
    Assigned(J),
    /// The job creator returned an error or panicked.
    Failed,
}

impl<J> PipelineOutcome<J> {
    pub fn into_job(self) -> Option<J> {
        match self {
            PipelineOutcome::Assigned(job) => Some(job),
            _ => None,
        }
    }

    pub fn is_denied(&self) -> bool {
        matches!(self, PipelineOutcome::Denied(_))
    }
}

type PreconditionFn<'a> = Box<dyn Fn(&dyn WorldAccessor, &Agent) -> bool + 'a>;

/// Per-invocation options for [`JobEngine::try_give_job_detailed`].
#[derive(Default)]
pub struct JobRequest<'a> {
    provider: Option<ProviderId>,
    ignore_emergency: bool,
    preconditions: Vec<(&'static str, PreconditionFn<'a>)>,
}

impl<'a> JobRequest<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_provider(provider: impl Into<ProviderId>) -> Self {
        Self {
            provider: Some(provider.into()),
            ..Self::default()
        }
    }

    /// Opt out of emergency preemption, e.g. for the emergency provider itself.
    pub fn ignore_emergency(mut self) -> Self {
        self.ignore_emergency = true;
        self
    }

    /// Appends a named check; checks run in insertion order.
    pub fn precondition<F>(mut self, name: &'static str, check: F) -> Self
    where
        F: Fn(&dyn WorldAccessor, &Agent) -> bool + 'a,
    {
        self.preconditions.push((name, Box::new(check)));
        self
    }
}

/// Invocation counts by outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineCounters {
    pub invocations: u64,
    pub assigned: u64,
    pub no_job: u64,
    pub failed: u64,
    pub denied_unavailable: u64,
    pub denied_emergency: u64,
    pub denied_ineligible: u64,
    pub denied_missing_capability: u64,
    pub denied_work_suppressed: u64,
    pub denied_provider_inactive: u64,
    pub denied_dependency: u64,
    pub denied_precondition: u64,
}

impl PipelineCounters {
    fn record<J>(&mut self, outcome: &PipelineOutcome<J>) {
        self.invocations += 1;
        let slot = match outcome {
            PipelineOutcome::Assigned(_) => &mut self.assigned,
            PipelineOutcome::NoJob => &mut self.no_job,
            PipelineOutcome::Failed => &mut self.failed,
            PipelineOutcome::Denied(reason) => match reason {
                DenyReason::Unavailable => &mut self.denied_unavailable,
                DenyReason::Emergency => &mut self.denied_emergency,
                DenyReason::Ineligible => &mut self.denied_ineligible,
                DenyReason::MissingCapability => &mut self.denied_missing_capability,
                DenyReason::WorkSuppressed => &mut self.denied_work_suppressed,
                DenyReason::ProviderInactive => &mut self.denied_provider_inactive,
                DenyReason::DependencyUnsatisfied => &mut self.denied_dependency,
                DenyReason::Precondition => &mut self.denied_precondition,
            },
        };
        *slot += 1;
    }

    pub fn denied(&self) -> u64 {
        self.denied_unavailable
            + self.denied_emergency
            + self.denied_ineligible
            + self.denied_missing_capability
            + self.denied_work_suppressed
            + self.denied_provider_inactive
            + self.denied_dependency
            + self.denied_precondition
    }
}

/// Search facilities available to a job creator, scoped to the invoking
/// provider and the agent's map.
pub struct JobContext<'a> {
    store: &'a mut WorldCacheStore,
    world: &'a dyn WorldAccessor,
    provider: &'a ProviderId,
    map: MapId,
    tick: u64,
    policy: CachePolicy,
    thresholds: &'a [i64],
}

impl<'a> JobContext<'a> {
    pub fn world(&self) -> &'a dyn WorldAccessor {
        self.world
    }

    pub fn provider(&self) -> &ProviderId {
        self.provider
    }

    pub fn map(&self) -> MapId {
        self.map
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn cache_policy(&self) -> CachePolicy {
        self.policy
    }

    pub fn distance_thresholds(&self) -> &[i64] {
        self.thresholds
    }

    /// The provider's cached candidates, refreshed when due.
    pub fn candidates(&mut self, source: &dyn CandidateSource) -> &[CandidateId] {
        self.store.candidates_for(
            self.provider,
            self.map,
            self.tick,
            &self.policy,
            source,
            self.world,
        )
    }

    pub fn build_buckets(
        &self,
        agent: &Agent,
        candidates: &[CandidateId],
        thresholds: &[i64],
    ) -> DistanceBuckets {
        build_distance_buckets(agent, candidates, thresholds, self.world)
    }

    /// This provider's memo region on the current map.
    pub fn memo(&mut self) -> MemoScope<'_> {
        self.store.memo_mut().scope(self.map, self.provider)
    }

    /// Replayable RNG for custom searches by this provider.
    pub fn rng_for(&self, agent: &Agent) -> ChaCha8Rng {
        selection_rng(self.tick, agent, self.provider)
    }

    /// Cache lookup, distance bucketing with the configured thresholds and
    /// memoized nearest-first selection in one call.
    pub fn find_target<V>(
        &mut self,
        agent: &Agent,
        source: &dyn CandidateSource,
        validator: &V,
    ) -> Option<CandidateId>
    where
        V: Validator + ?Sized,
    {
        let thresholds = self.thresholds;
        self.find_target_within(agent, source, thresholds, validator)
    }

    pub fn find_target_within<V>(
        &mut self,
        agent: &Agent,
        source: &dyn CandidateSource,
        thresholds: &[i64],
        validator: &V,
    ) -> Option<CandidateId>
    where
        V: Validator + ?Sized,
    {
        let world = self.world;
        let candidates = self.candidates(source);
        let buckets = build_distance_buckets(agent, candidates, thresholds, world);
        if buckets.is_empty() {
            return None;
        }
        let mut rng = self.rng_for(agent);
        select_first_valid(buckets, agent, validator, Some(self.memo()), &mut rng)
    }
}

/// Owns all engine state: configuration, per-map caches, the provider
/// registry and the agent eligibility cache.
#[derive(Resource, Debug)]
pub struct JobEngine {
    config: Arc<EngineConfig>,
    store: WorldCacheStore,
    registry: ProviderRegistry,
    eligibility: EligibilityCache,
    counters: PipelineCounters,
}

impl Default for JobEngine {
    fn default() -> Self {
        Self::new(EngineConfig::builtin())
    }
}

impl JobEngine {
    pub fn new(config: Arc<EngineConfig>) -> Self {
        Self {
            store: WorldCacheStore::new(config.cache().memo_max_entries_per_map),
            eligibility: EligibilityCache::new(config.pipeline().eligibility_cache_ticks),
            registry: ProviderRegistry::new(),
            counters: PipelineCounters::default(),
            config,
        }
    }

    /// Engine configured from `JOB_ENGINE_CONFIG_PATH`, or the builtin config.
    pub fn from_env() -> Self {
        let (config, _) = load_engine_config_from_env();
        Self::new(config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn register_provider(&mut self, provider: impl Into<ProviderId>, metadata: ProviderMetadata) {
        self.registry.register(provider.into(), metadata);
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ProviderRegistry {
        &mut self.registry
    }

    pub fn store(&self) -> &WorldCacheStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut WorldCacheStore {
        &mut self.store
    }

    pub fn counters(&self) -> PipelineCounters {
        self.counters
    }

    /// Refresh policy for `provider`: its declared overrides on top of the
    /// configured defaults.
    pub fn cache_policy_for(&self, provider: &ProviderId) -> CachePolicy {
        let defaults = self.config.cache();
        let metadata = self.registry.metadata(provider);
        CachePolicy {
            refresh_interval_ticks: metadata
                .and_then(|m| m.custom_refresh_interval)
                .unwrap_or(defaults.default_refresh_interval_ticks),
            max_size: metadata
                .and_then(|m| m.max_candidates)
                .unwrap_or(defaults.default_max_size),
            min_partitions_per_tick: defaults.min_partitions_per_tick,
        }
    }

    /// Runs the pipeline and returns the created job, if any. Never panics
    /// because of the job creator.
    pub fn standard_try_give_job<J, F>(
        &mut self,
        world: &dyn WorldAccessor,
        policy: &dyn HostPolicy,
        agent: &Agent,
        work: &WorkTag,
        request: JobRequest<'_>,
        job_creator: F,
    ) -> Option<J>
    where
        F: FnOnce(&mut JobContext<'_>, &Agent) -> Result<Option<J>, JobError>,
    {
        self.try_give_job_detailed(world, policy, agent, work, request, job_creator)
            .into_job()
    }

    pub fn try_give_job_detailed<J, F>(
        &mut self,
        world: &dyn WorldAccessor,
        policy: &dyn HostPolicy,
        agent: &Agent,
        work: &WorkTag,
        request: JobRequest<'_>,
        job_creator: F,
    ) -> PipelineOutcome<J>
    where
        F: FnOnce(&mut JobContext<'_>, &Agent) -> Result<Option<J>, JobError>,
    {
        let provider = request
            .provider
            .clone()
            .unwrap_or_else(|| ProviderId::new(work.as_str()));
        let tick = world.current_tick();

        let outcome = match self.check_gates(world, policy, agent, work, &provider, &request, tick) {
            Some(reason) => {
                trace!(
                    target: "job_core::pipeline",
                    %provider,
                    agent = %agent.id,
                    ?reason,
                    "pipeline.denied"
                );
                PipelineOutcome::Denied(reason)
            }
            None => self.create_job(world, agent, &provider, tick, job_creator),
        };
        self.counters.record(&outcome);
        outcome
    }

    #[allow(clippy::too_many_arguments)]
    fn check_gates(
        &mut self,
        world: &dyn WorldAccessor,
        policy: &dyn HostPolicy,
        agent: &Agent,
        work: &WorkTag,
        provider: &ProviderId,
        request: &JobRequest<'_>,
        tick: u64,
    ) -> Option<DenyReason> {
        if !agent.is_available() {
            return Some(DenyReason::Unavailable);
        }
        if !request.ignore_emergency && policy.is_emergency_present(world, agent) {
            return Some(DenyReason::Emergency);
        }
        if !self.eligibility.is_eligible(policy, agent, work, tick) {
            return Some(DenyReason::Ineligible);
        }
        if let Some(metadata) = self.registry.metadata(provider) {
            if !metadata.required_capabilities.is_subset(&agent.capabilities) {
                return Some(DenyReason::MissingCapability);
            }
        }
        if policy.is_work_suppressed(agent.map, work) {
            return Some(DenyReason::WorkSuppressed);
        }
        if !self.registry.is_active(provider, agent.map) {
            return Some(DenyReason::ProviderInactive);
        }
        if let Some(blocked) = self.registry.first_unsatisfied_dependency(provider, agent) {
            trace!(
                target: "job_core::pipeline",
                %provider,
                dependency = %blocked,
                map = %agent.map,
                "pipeline.dependency_inactive"
            );
            return Some(DenyReason::DependencyUnsatisfied);
        }
        for (name, check) in &request.preconditions {
            if !check(world, agent) {
                trace!(
                    target: "job_core::pipeline",
                    %provider,
                    precondition = name,
                    "pipeline.precondition_failed"
                );
                return Some(DenyReason::Precondition);
            }
        }
        None
    }

    fn create_job<J, F>(
        &mut self,
        world: &dyn WorldAccessor,
        agent: &Agent,
        provider: &ProviderId,
        tick: u64,
        job_creator: F,
    ) -> PipelineOutcome<J>
    where
        F: FnOnce(&mut JobContext<'_>, &Agent) -> Result<Option<J>, JobError>,
    {
        let policy = self.cache_policy_for(provider);
        let started = Instant::now();
        let result = {
            let mut ctx = JobContext {
                store: &mut self.store,
                world,
                provider,
                map: agent.map,
                tick,
                policy,
                thresholds: self.config.search().distance_thresholds(),
            };
            catch_unwind(AssertUnwindSafe(|| job_creator(&mut ctx, agent)))
        };
        let elapsed = started.elapsed();

        let outcome = match result {
            Ok(Ok(Some(job))) => PipelineOutcome::Assigned(job),
            Ok(Ok(None)) => PipelineOutcome::NoJob,
            Ok(Err(err)) => {
                warn!(
                    target: "job_core::pipeline",
                    %provider,
                    agent = %agent.id,
                    map = %agent.map,
                    tick,
                    error = %err,
                    "pipeline.job_failed"
                );
                PipelineOutcome::Failed
            }
            Err(payload) => {
                error!(
                    target: "job_core::pipeline",
                    %provider,
                    agent = %agent.id,
                    map = %agent.map,
                    tick,
                    panic = %panic_message(payload.as_ref()),
                    "pipeline.job_panicked"
                );
                PipelineOutcome::Failed
            }
        };

        let success = matches!(outcome, PipelineOutcome::Assigned(_));
        self.registry
            .record_execution(provider, success, elapsed, tick);

        let elapsed_ms = elapsed.as_secs_f64() * 1_000.0;
        if elapsed_ms > self.config.pipeline().slow_execution_warn_ms {
            warn!(
                target: "job_core::pipeline",
                %provider,
                agent = %agent.id,
                elapsed_ms,
                "pipeline.slow_provider"
            );
        }
        outcome
    }

    /// Prepares per-map state for a newly loaded map.
    pub fn on_map_finalized(&mut self, map: MapId) {
        self.store.on_map_finalized(map);
    }

    /// Drops every cache entry, memo and deactivation tied to `map`.
    pub fn on_map_removed(&mut self, map: MapId) {
        self.store.on_map_removed(map);
        self.registry.clear_map(map);
    }

    pub fn on_agent_removed(&mut self, agent: AgentId) {
        self.eligibility.forget_agent(agent);
    }

    /// Full reset for a new game or load: caches, registry and counters.
    pub fn reset_all(&mut self) {
        self.store.clear();
        self.registry.reset();
        self.eligibility.clear();
        self.counters = PipelineCounters::default();
        debug!(target: "job_core::pipeline", "engine.reset");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
