//! Provider metadata, per-map deactivation, dependency resolution and
//! execution statistics.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use crate::ids::{MapId, ProviderId, WorkTag};
use crate::world::Agent;

/// Static description of a job provider, supplied at registration.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderMetadata {
    pub work: WorkTag,
    pub base_priority: i32,
    pub custom_refresh_interval: Option<u64>,
    pub max_candidates: Option<usize>,
    pub required_capabilities: HashSet<WorkTag>,
    pub depends_on: BTreeSet<ProviderId>,
}

impl ProviderMetadata {
    pub fn new(work: impl Into<WorkTag>) -> Self {
        Self {
            work: work.into(),
            base_priority: 0,
            custom_refresh_interval: None,
            max_candidates: None,
            required_capabilities: HashSet::new(),
            depends_on: BTreeSet::new(),
        }
    }

    pub fn priority(mut self, base_priority: i32) -> Self {
        self.base_priority = base_priority;
        self
    }

    pub fn refresh_every(mut self, ticks: u64) -> Self {
        self.custom_refresh_interval = Some(ticks);
        self
    }

    pub fn max_candidates(mut self, max: usize) -> Self {
        self.max_candidates = Some(max);
        self
    }

    pub fn requires(mut self, capability: impl Into<WorkTag>) -> Self {
        self.required_capabilities.insert(capability.into());
        self
    }

    pub fn depends_on(mut self, provider: impl Into<ProviderId>) -> Self {
        self.depends_on.insert(provider.into());
        self
    }
}

/// Running execution counters for one provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ProviderStats {
    pub total_runs: u64,
    pub successful_runs: u64,
    pub total_time_ms: f64,
    pub max_time_ms: f64,
    pub last_run_tick: Option<u64>,
}

impl ProviderStats {
    fn record(&mut self, success: bool, elapsed_ms: f64, tick: u64) {
        self.total_runs += 1;
        if success {
            self.successful_runs += 1;
        }
        self.total_time_ms += elapsed_ms;
        self.max_time_ms = self.max_time_ms.max(elapsed_ms);
        self.last_run_tick = Some(tick);
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_runs == 0 {
            0.0
        } else {
            self.successful_runs as f64 / self.total_runs as f64
        }
    }

    pub fn average_time_ms(&self) -> f64 {
        if self.total_runs == 0 {
            0.0
        } else {
            self.total_time_ms / self.total_runs as f64
        }
    }
}

#[derive(Debug, Clone, Default)]
struct ProviderEntry {
    /// `None` for identities that only ever recorded executions.
    metadata: Option<ProviderMetadata>,
    stats: ProviderStats,
}

/// Providers explicitly disabled per map.
#[derive(Debug, Default, Clone)]
pub struct DeactivationSet {
    maps: HashMap<MapId, HashSet<ProviderId>>,
}

impl DeactivationSet {
    pub fn deactivate(&mut self, provider: ProviderId, map: MapId) -> bool {
        self.maps.entry(map).or_default().insert(provider)
    }

    pub fn reactivate(&mut self, provider: &ProviderId, map: MapId) -> bool {
        self.maps
            .get_mut(&map)
            .map(|set| set.remove(provider))
            .unwrap_or(false)
    }

    pub fn contains(&self, provider: &ProviderId, map: MapId) -> bool {
        self.maps
            .get(&map)
            .is_some_and(|set| set.contains(provider))
    }

    pub fn clear_map(&mut self, map: MapId) {
        self.maps.remove(&map);
    }

    pub fn clear(&mut self) {
        self.maps.clear();
    }

    pub fn len(&self, map: MapId) -> usize {
        self.maps.get(&map).map(HashSet::len).unwrap_or(0)
    }
}

/// Waives a dependency for agents that do not need the upstream resource.
pub type BypassCondition = Box<dyn Fn(&Agent) -> bool + Send + Sync>;

/// One row of [`ProviderRegistry::report`].
#[derive(Debug, Clone, Serialize)]
pub struct ProviderReport {
    pub provider: ProviderId,
    pub work: Option<WorkTag>,
    pub base_priority: i32,
    pub total_runs: u64,
    pub successful_runs: u64,
    pub success_rate: f64,
    pub total_time_ms: f64,
    pub average_time_ms: f64,
    pub max_time_ms: f64,
    pub last_run_tick: Option<u64>,
}

impl fmt::Display for ProviderReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} runs={} ok={} rate={:.1}% avg={:.2}ms max={:.2}ms",
            self.provider,
            self.total_runs,
            self.successful_runs,
            self.success_rate * 100.0,
            self.average_time_ms,
            self.max_time_ms
        )
    }
}

#[derive(Default)]
pub struct ProviderRegistry {
    entries: HashMap<ProviderId, ProviderEntry>,
    bypasses: HashMap<(ProviderId, ProviderId), Vec<BypassCondition>>,
    deactivated: DeactivationSet,
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("entries", &self.entries)
            .field("bypasses", &self.bypasses.len())
            .field("deactivated", &self.deactivated)
            .finish()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or updates a provider. Accumulated statistics survive
    /// re-registration.
    pub fn register(&mut self, provider: ProviderId, mut metadata: ProviderMetadata) {
        if metadata.depends_on.remove(&provider) {
            warn!(
                target: "job_core::registry",
                %provider,
                "registry.self_dependency_ignored"
            );
        }
        let entry = self.entries.entry(provider.clone()).or_default();
        let updated = entry.metadata.is_some();
        entry.metadata = Some(metadata);
        debug!(
            target: "job_core::registry",
            %provider,
            updated,
            "registry.provider_registered"
        );
    }

    pub fn is_registered(&self, provider: &ProviderId) -> bool {
        self.entries
            .get(provider)
            .is_some_and(|entry| entry.metadata.is_some())
    }

    pub fn metadata(&self, provider: &ProviderId) -> Option<&ProviderMetadata> {
        self.entries
            .get(provider)
            .and_then(|entry| entry.metadata.as_ref())
    }

    pub fn stats(&self, provider: &ProviderId) -> Option<ProviderStats> {
        self.entries.get(provider).map(|entry| entry.stats)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn deactivate(&mut self, provider: impl Into<ProviderId>, map: MapId) {
        let provider = provider.into();
        if self.deactivated.deactivate(provider.clone(), map) {
            debug!(target: "job_core::registry", %provider, %map, "registry.deactivated");
        }
    }

    pub fn reactivate(&mut self, provider: &ProviderId, map: MapId) {
        if self.deactivated.reactivate(provider, map) {
            debug!(target: "job_core::registry", %provider, %map, "registry.reactivated");
        }
    }

    /// False only when explicitly deactivated for `map`; unknown providers
    /// count as active.
    pub fn is_active(&self, provider: &ProviderId, map: MapId) -> bool {
        !self.deactivated.contains(provider, map)
    }

    pub fn deactivations(&self) -> &DeactivationSet {
        &self.deactivated
    }

    pub fn register_bypass<F>(
        &mut self,
        provider: impl Into<ProviderId>,
        dependency: impl Into<ProviderId>,
        condition: F,
    ) where
        F: Fn(&Agent) -> bool + Send + Sync + 'static,
    {
        self.bypasses
            .entry((provider.into(), dependency.into()))
            .or_default()
            .push(Box::new(condition));
    }

    fn is_bypassed(&self, provider: &ProviderId, dependency: &ProviderId, agent: &Agent) -> bool {
        self.bypasses
            .get(&(provider.clone(), dependency.clone()))
            .is_some_and(|conditions| conditions.iter().any(|condition| condition(agent)))
    }

    pub fn dependencies_satisfied(&self, provider: &ProviderId, agent: &Agent) -> bool {
        self.first_unsatisfied_dependency(provider, agent).is_none()
    }

    /// Returns the first declared dependency that is neither bypassed for
    /// this agent nor active on the agent's map. Only direct edges count; a
    /// dependency's own dependencies are its gate, not this provider's.
    pub fn first_unsatisfied_dependency(
        &self,
        provider: &ProviderId,
        agent: &Agent,
    ) -> Option<ProviderId> {
        let metadata = self.metadata(provider)?;
        metadata
            .depends_on
            .iter()
            .find(|dependency| {
                !self.is_bypassed(provider, dependency, agent)
                    && !self.is_active(dependency, agent.map)
            })
            .cloned()
    }

    pub fn record_execution(
        &mut self,
        provider: &ProviderId,
        success: bool,
        elapsed: Duration,
        tick: u64,
    ) {
        let elapsed_ms = elapsed.as_secs_f64() * 1_000.0;
        self.entries
            .entry(provider.clone())
            .or_default()
            .stats
            .record(success, elapsed_ms, tick);
    }

    /// Registered providers of `work`, highest base priority first.
    pub fn providers_for(&self, work: &WorkTag) -> Vec<ProviderId> {
        let mut matches: Vec<(i32, &ProviderId)> = self
            .entries
            .iter()
            .filter_map(|(id, entry)| {
                entry
                    .metadata
                    .as_ref()
                    .filter(|metadata| &metadata.work == work)
                    .map(|metadata| (metadata.base_priority, id))
            })
            .collect();
        matches.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));
        matches.into_iter().map(|(_, id)| id.clone()).collect()
    }

    /// One row per known identity, most expensive first.
    pub fn report(&self) -> Vec<ProviderReport> {
        let mut rows: Vec<ProviderReport> = self
            .entries
            .iter()
            .map(|(id, entry)| ProviderReport {
                provider: id.clone(),
                work: entry.metadata.as_ref().map(|m| m.work.clone()),
                base_priority: entry.metadata.as_ref().map_or(0, |m| m.base_priority),
                total_runs: entry.stats.total_runs,
                successful_runs: entry.stats.successful_runs,
                success_rate: entry.stats.success_rate(),
                total_time_ms: entry.stats.total_time_ms,
                average_time_ms: entry.stats.average_time_ms(),
                max_time_ms: entry.stats.max_time_ms,
                last_run_tick: entry.stats.last_run_tick,
            })
            .collect();
        rows.sort_by(|a, b| {
            b.total_time_ms
                .total_cmp(&a.total_time_ms)
                .then_with(|| a.provider.cmp(&b.provider))
        });
        rows
    }

    pub fn clear_map(&mut self, map: MapId) {
        self.deactivated.clear_map(map);
    }

    /// Forgets every provider, bypass and deactivation.
    pub fn reset(&mut self) {
        self.entries.clear();
        self.bypasses.clear();
        self.deactivated.clear();
    }
}

#[cfg(test)]
mod tests {
    use bevy::math::IVec2;

    use super::*;
    use crate::test_support::agent_at;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn reregistration_updates_metadata_and_keeps_stats() {
        let mut registry = ProviderRegistry::new();
        let id = ProviderId::new("haul.general");
        registry.register(id.clone(), ProviderMetadata::new("hauling").priority(1));
        registry.record_execution(&id, true, ms(2), 10);

        registry.register(
            id.clone(),
            ProviderMetadata::new("hauling").priority(5).refresh_every(60),
        );
        let metadata = registry.metadata(&id).unwrap();
        assert_eq!(metadata.base_priority, 5);
        assert_eq!(metadata.custom_refresh_interval, Some(60));
        assert_eq!(registry.stats(&id).unwrap().total_runs, 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unknown_providers_are_active_and_unblocked() {
        let registry = ProviderRegistry::new();
        let ghost = ProviderId::new("ghost");
        let agent = agent_at(1, IVec2::ZERO);
        assert!(registry.is_active(&ghost, MapId(0)));
        assert!(registry.dependencies_satisfied(&ghost, &agent));
    }

    #[test]
    fn deactivated_dependency_blocks_only_on_that_map() {
        let mut registry = ProviderRegistry::new();
        registry.register("cook".into(), ProviderMetadata::new("cooking"));
        registry.register(
            "feed".into(),
            ProviderMetadata::new("doctoring").depends_on("cook"),
        );
        registry.deactivate("cook", MapId(0));

        let on_blocked_map = agent_at(1, IVec2::ZERO);
        let mut elsewhere = agent_at(2, IVec2::ZERO);
        elsewhere.map = MapId(1);

        let feed = ProviderId::new("feed");
        assert_eq!(
            registry.first_unsatisfied_dependency(&feed, &on_blocked_map),
            Some(ProviderId::new("cook"))
        );
        assert!(registry.dependencies_satisfied(&feed, &elsewhere));

        registry.reactivate(&ProviderId::new("cook"), MapId(0));
        assert!(registry.dependencies_satisfied(&feed, &on_blocked_map));
    }

    #[test]
    fn bypass_condition_waives_dependency() {
        let mut registry = ProviderRegistry::new();
        registry.register(
            "feed".into(),
            ProviderMetadata::new("doctoring").depends_on("cook"),
        );
        registry.deactivate("cook", MapId(0));
        registry.register_bypass("feed", "cook", |agent: &Agent| {
            agent.capabilities.contains(&WorkTag::new("forager"))
        });

        let feed = ProviderId::new("feed");
        let plain = agent_at(1, IVec2::ZERO);
        let forager = agent_at(2, IVec2::ZERO).with_capability("forager");
        assert!(!registry.dependencies_satisfied(&feed, &plain));
        assert!(registry.dependencies_satisfied(&feed, &forager));
    }

    #[test]
    fn only_direct_dependencies_gate_a_provider() {
        let mut registry = ProviderRegistry::new();
        registry.register("a".into(), ProviderMetadata::new("w").depends_on("c"));
        registry.register("b".into(), ProviderMetadata::new("w").depends_on("a"));
        registry.register("c".into(), ProviderMetadata::new("w"));
        let agent = agent_at(1, IVec2::ZERO);
        assert!(registry.dependencies_satisfied(&ProviderId::new("b"), &agent));

        registry.deactivate("c", MapId(0));
        assert_eq!(
            registry.first_unsatisfied_dependency(&ProviderId::new("a"), &agent),
            Some(ProviderId::new("c"))
        );
        assert!(!registry.dependencies_satisfied(&ProviderId::new("a"), &agent));
        assert!(registry.dependencies_satisfied(&ProviderId::new("b"), &agent));
    }

    #[test]
    fn dependency_cycles_resolve_on_direct_edges() {
        let mut registry = ProviderRegistry::new();
        registry.register("a".into(), ProviderMetadata::new("w").depends_on("b"));
        registry.register("b".into(), ProviderMetadata::new("w").depends_on("a"));
        let agent = agent_at(1, IVec2::ZERO);
        assert!(registry.dependencies_satisfied(&ProviderId::new("a"), &agent));

        registry.deactivate("a", MapId(0));
        assert!(registry.dependencies_satisfied(&ProviderId::new("a"), &agent));
        assert!(!registry.dependencies_satisfied(&ProviderId::new("b"), &agent));
    }

    #[test]
    fn self_dependency_is_dropped() {
        let mut registry = ProviderRegistry::new();
        registry.register("a".into(), ProviderMetadata::new("w").depends_on("a"));
        assert!(registry
            .metadata(&ProviderId::new("a"))
            .unwrap()
            .depends_on
            .is_empty());
    }

    #[test]
    fn statistics_accumulate() {
        let mut registry = ProviderRegistry::new();
        let id = ProviderId::new("haul.general");
        registry.record_execution(&id, true, ms(1), 1);
        registry.record_execution(&id, false, ms(4), 2);
        registry.record_execution(&id, true, ms(1), 3);

        let stats = registry.stats(&id).unwrap();
        assert_eq!(stats.total_runs, 3);
        assert_eq!(stats.successful_runs, 2);
        assert!((stats.success_rate() - 2.0 / 3.0).abs() < 1e-9);
        assert!((stats.average_time_ms() - 2.0).abs() < 1e-9);
        assert!((stats.max_time_ms - 4.0).abs() < 1e-9);
        assert_eq!(stats.last_run_tick, Some(3));
        assert!(!registry.is_registered(&id), "stats-only entry");
    }

    #[test]
    fn providers_for_orders_by_priority() {
        let mut registry = ProviderRegistry::new();
        registry.register("low".into(), ProviderMetadata::new("hauling").priority(1));
        registry.register("high".into(), ProviderMetadata::new("hauling").priority(9));
        registry.register("other".into(), ProviderMetadata::new("cooking").priority(50));
        registry.register("mid_b".into(), ProviderMetadata::new("hauling").priority(5));
        registry.register("mid_a".into(), ProviderMetadata::new("hauling").priority(5));

        let ordered: Vec<_> = registry
            .providers_for(&WorkTag::new("hauling"))
            .iter()
            .map(|id| id.to_string())
            .collect();
        assert_eq!(ordered, ["high", "mid_a", "mid_b", "low"]);
    }

    #[test]
    fn report_renders_most_expensive_first() {
        let mut registry = ProviderRegistry::new();
        registry.register("haul.general".into(), ProviderMetadata::new("hauling"));
        registry.record_execution(&"haul.general".into(), true, ms(3), 4);
        registry.record_execution(&"haul.general".into(), false, ms(1), 5);
        registry.record_execution(&"construct.walls".into(), true, ms(10), 5);

        let rendered: Vec<String> = registry.report().iter().map(|row| row.to_string()).collect();
        insta::assert_snapshot!(rendered.join("\n"), @r###"
        construct.walls runs=1 ok=1 rate=100.0% avg=10.00ms max=10.00ms
        haul.general runs=2 ok=1 rate=50.0% avg=2.00ms max=3.00ms
        "###);
    }

    #[test]
    fn reset_forgets_everything() {
        let mut registry = ProviderRegistry::new();
        registry.register("a".into(), ProviderMetadata::new("w"));
        registry.deactivate("a", MapId(0));
        registry.reset();
        assert!(registry.is_empty());
        assert!(registry.is_active(&ProviderId::new("a"), MapId(0)));
    }
}
