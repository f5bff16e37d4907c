//! Interface boundary to the host simulation.
//!
//! The engine never reads map data directly. Everything it knows about the
//! world comes through [`WorldAccessor`], and every policy decision the host
//! owns (emergencies, work settings) comes through [`HostPolicy`].

use std::collections::HashSet;

use bevy::math::IVec2;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids::{AgentId, CandidateId, MapId, WorkTag};

/// Failure raised by the host while enumerating candidates.
#[derive(Debug, Clone, Error)]
pub enum WorldQueryError {
    #[error("map {0} is not loaded")]
    MapUnavailable(MapId),
    #[error("partition {partition} out of range on map {map}")]
    PartitionOutOfRange { map: MapId, partition: usize },
    #[error("candidate query failed: {0}")]
    Query(String),
}

/// Read access to the host world, queried synchronously within a tick.
pub trait WorldAccessor {
    /// Monotonically non-decreasing simulation tick.
    fn current_tick(&self) -> u64;

    fn enumerate_candidates(
        &self,
        map: MapId,
        category: &WorkTag,
    ) -> Result<Vec<CandidateId>, WorldQueryError>;

    /// Number of spatial partitions used by progressive enumeration.
    fn partition_count(&self, _map: MapId) -> usize {
        1
    }

    fn enumerate_partition(
        &self,
        map: MapId,
        category: &WorkTag,
        partition: usize,
    ) -> Result<Vec<CandidateId>, WorldQueryError> {
        if partition == 0 {
            self.enumerate_candidates(map, category)
        } else {
            Err(WorldQueryError::PartitionOutOfRange { map, partition })
        }
    }

    /// False once the candidate is destroyed or not yet spawned.
    fn is_live(&self, candidate: CandidateId) -> bool;

    fn candidate_position(&self, candidate: CandidateId) -> Option<IVec2>;
}

bitflags! {
    /// Host-maintained state flags relevant to autonomous work.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct AgentFlags: u8 {
        /// Under direct player control.
        const DRAFTED = 0b0000_0001;
        /// Incapacitated.
        const DOWNED = 0b0000_0010;
        /// Work for this agent is assigned by the engine.
        const MANAGED = 0b0000_0100;
    }
}

impl Default for AgentFlags {
    fn default() -> Self {
        AgentFlags::MANAGED
    }
}

/// Read-only snapshot of an agent, built by the host for one query.
#[derive(Debug, Clone)]
pub struct Agent {
    pub id: AgentId,
    pub map: MapId,
    pub position: IVec2,
    pub faction: u32,
    pub flags: AgentFlags,
    /// Work categories the agent is allowed to perform at all.
    pub enabled_work: HashSet<WorkTag>,
    /// Work categories switched on in the agent's own priorities.
    pub active_work: HashSet<WorkTag>,
    pub capabilities: HashSet<WorkTag>,
}

impl Agent {
    pub fn new(id: AgentId, map: MapId, position: IVec2) -> Self {
        Self {
            id,
            map,
            position,
            faction: 0,
            flags: AgentFlags::default(),
            enabled_work: HashSet::new(),
            active_work: HashSet::new(),
            capabilities: HashSet::new(),
        }
    }

    /// Enables and activates a work category.
    pub fn with_work(mut self, work: impl Into<WorkTag>) -> Self {
        let work = work.into();
        self.enabled_work.insert(work.clone());
        self.active_work.insert(work);
        self
    }

    pub fn with_capability(mut self, capability: impl Into<WorkTag>) -> Self {
        self.capabilities.insert(capability.into());
        self
    }

    pub fn with_flags(mut self, flags: AgentFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Drafted or downed agents take no autonomous work.
    pub fn is_available(&self) -> bool {
        !self
            .flags
            .intersects(AgentFlags::DRAFTED | AgentFlags::DOWNED)
    }
}

/// Policy predicates owned by the host.
pub trait HostPolicy {
    /// An emergency the agent is aware of and able to respond to.
    fn is_emergency_present(&self, _world: &dyn WorldAccessor, _agent: &Agent) -> bool {
        false
    }

    fn agent_is_eligible(&self, agent: &Agent, work: &WorkTag) -> bool {
        agent.flags.contains(AgentFlags::MANAGED)
            && agent.enabled_work.contains(work)
            && agent.active_work.contains(work)
    }

    /// Map-level suppression of a work category.
    fn is_work_suppressed(&self, _map: MapId, _work: &WorkTag) -> bool {
        false
    }
}

/// Policy that accepts the defaults for every predicate.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultHostPolicy;

impl HostPolicy for DefaultHostPolicy {}

/// Squared Euclidean distance between two cells.
pub fn distance_squared(a: IVec2, b: IVec2) -> i64 {
    let dx = (a.x as i64) - (b.x as i64);
    let dy = (a.y as i64) - (b.y as i64);
    dx * dx + dy * dy
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drafted_or_downed_agents_are_unavailable() {
        let agent = Agent::new(AgentId(1), MapId(0), IVec2::ZERO);
        assert!(agent.is_available());
        let drafted = agent
            .clone()
            .with_flags(AgentFlags::MANAGED | AgentFlags::DRAFTED);
        assert!(!drafted.is_available());
        let downed = agent.with_flags(AgentFlags::DOWNED);
        assert!(!downed.is_available());
    }

    #[test]
    fn default_eligibility_requires_managed_enabled_and_active() {
        let policy = DefaultHostPolicy;
        let hauling = WorkTag::new("hauling");
        let agent = Agent::new(AgentId(1), MapId(0), IVec2::ZERO).with_work("hauling");
        assert!(policy.agent_is_eligible(&agent, &hauling));

        let mut inactive = agent.clone();
        inactive.active_work.clear();
        assert!(!policy.agent_is_eligible(&inactive, &hauling));

        let unmanaged = agent.with_flags(AgentFlags::empty());
        assert!(!policy.agent_is_eligible(&unmanaged, &hauling));
    }

    #[test]
    fn distance_squared_handles_negative_offsets() {
        assert_eq!(distance_squared(IVec2::new(-3, 0), IVec2::new(0, 4)), 25);
    }
}
