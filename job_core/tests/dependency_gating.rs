use bevy::math::IVec2;
use job_core::{
    Agent, AgentFlags, AgentId, CandidateId, DefaultHostPolicy, DenyReason, JobEngine, JobRequest,
    MapId, PipelineOutcome, ProviderId, ProviderMetadata, WorkTag, WorldAccessor, WorldQueryError,
};

struct EmptyWorld;

impl WorldAccessor for EmptyWorld {
    fn current_tick(&self) -> u64 {
        10
    }

    fn enumerate_candidates(
        &self,
        _map: MapId,
        _category: &WorkTag,
    ) -> Result<Vec<CandidateId>, WorldQueryError> {
        Ok(Vec::new())
    }

    fn is_live(&self, _candidate: CandidateId) -> bool {
        false
    }

    fn candidate_position(&self, _candidate: CandidateId) -> Option<IVec2> {
        None
    }
}

fn engine_with_chain() -> JobEngine {
    let mut engine = JobEngine::default();
    engine.register_provider("haul.stockpile", ProviderMetadata::new("hauling"));
    engine.register_provider(
        "cook.meals",
        ProviderMetadata::new("cooking").depends_on("haul.stockpile"),
    );
    engine.register_provider(
        "serve.meals",
        ProviderMetadata::new("cooking").depends_on("cook.meals"),
    );
    engine
}

fn cook(map: u32) -> Agent {
    Agent::new(AgentId(4), MapId(map), IVec2::ZERO).with_work("cooking")
}

fn offer(engine: &mut JobEngine, agent: &Agent, provider: &str) -> PipelineOutcome<&'static str> {
    engine.try_give_job_detailed(
        &EmptyWorld,
        &DefaultHostPolicy,
        agent,
        &WorkTag::new("cooking"),
        JobRequest::for_provider(provider),
        |_, _| Ok(Some("job")),
    )
}

#[test]
fn inactive_dependency_denies_dependent_provider() {
    let mut engine = engine_with_chain();
    engine.registry_mut().deactivate("haul.stockpile", MapId(0));

    assert_eq!(
        offer(&mut engine, &cook(0), "cook.meals"),
        PipelineOutcome::Denied(DenyReason::DependencyUnsatisfied)
    );
    // Other maps are unaffected.
    assert_eq!(
        offer(&mut engine, &cook(1), "cook.meals"),
        PipelineOutcome::Assigned("job")
    );
}

#[test]
fn only_direct_dependencies_are_checked() {
    let mut engine = engine_with_chain();
    engine.registry_mut().deactivate("haul.stockpile", MapId(0));

    // serve.meals depends on cook.meals, which is still active.
    assert_eq!(
        offer(&mut engine, &cook(0), "serve.meals"),
        PipelineOutcome::Assigned("job")
    );

    engine.registry_mut().deactivate("cook.meals", MapId(0));
    assert_eq!(
        offer(&mut engine, &cook(0), "serve.meals"),
        PipelineOutcome::Denied(DenyReason::DependencyUnsatisfied)
    );
}

#[test]
fn reactivation_restores_dependents() {
    let mut engine = engine_with_chain();
    engine.registry_mut().deactivate("haul.stockpile", MapId(0));
    engine
        .registry_mut()
        .reactivate(&ProviderId::new("haul.stockpile"), MapId(0));

    assert_eq!(
        offer(&mut engine, &cook(0), "cook.meals"),
        PipelineOutcome::Assigned("job")
    );
}

#[test]
fn bypass_condition_waives_dependency_for_matching_agents() {
    let mut engine = engine_with_chain();
    engine.registry_mut().deactivate("haul.stockpile", MapId(0));
    engine.registry_mut().register_bypass(
        "cook.meals",
        "haul.stockpile",
        |agent: &Agent| agent.capabilities.contains(&WorkTag::new("self_supplied")),
    );

    let plain = cook(0);
    let supplied = cook(0).with_capability("self_supplied");
    assert_eq!(
        offer(&mut engine, &plain, "cook.meals"),
        PipelineOutcome::Denied(DenyReason::DependencyUnsatisfied)
    );
    assert_eq!(
        offer(&mut engine, &supplied, "cook.meals"),
        PipelineOutcome::Assigned("job")
    );
}

#[test]
fn availability_is_checked_before_dependencies() {
    let mut engine = engine_with_chain();
    engine.registry_mut().deactivate("haul.stockpile", MapId(0));
    let downed = cook(0).with_flags(AgentFlags::MANAGED | AgentFlags::DOWNED);

    assert_eq!(
        offer(&mut engine, &downed, "cook.meals"),
        PipelineOutcome::Denied(DenyReason::Unavailable)
    );
    assert_eq!(engine.counters().denied_dependency, 0);
}

#[test]
fn map_removal_forgets_deactivations() {
    let mut engine = engine_with_chain();
    engine.registry_mut().deactivate("haul.stockpile", MapId(0));
    engine.on_map_removed(MapId(0));

    assert_eq!(
        offer(&mut engine, &cook(0), "cook.meals"),
        PipelineOutcome::Assigned("job")
    );
}
