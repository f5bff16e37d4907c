use std::cell::Cell;
use std::collections::BTreeMap;

use bevy::math::IVec2;

use crate::ids::{AgentId, CandidateId, MapId, WorkTag};
use crate::world::{Agent, WorldAccessor, WorldQueryError};

#[derive(Debug, Clone)]
pub struct TestCandidate {
    pub position: IVec2,
    pub live: bool,
    pub category: WorkTag,
}

/// In-memory world with one map and deterministic candidate ordering.
#[derive(Debug, Default)]
pub struct TestWorld {
    pub tick: u64,
    pub candidates: BTreeMap<CandidateId, TestCandidate>,
    pub partitions: usize,
    pub fail_enumeration: bool,
    pub enumerations: Cell<usize>,
    pub partition_scans: Cell<usize>,
}

impl TestWorld {
    pub fn new() -> Self {
        Self {
            partitions: 1,
            ..Self::default()
        }
    }

    pub fn spawn(&mut self, id: u64, category: &str, position: IVec2) -> CandidateId {
        let candidate = CandidateId(id);
        self.candidates.insert(
            candidate,
            TestCandidate {
                position,
                live: true,
                category: WorkTag::new(category),
            },
        );
        candidate
    }

    pub fn destroy(&mut self, id: CandidateId) {
        if let Some(candidate) = self.candidates.get_mut(&id) {
            candidate.live = false;
        }
    }

    fn matching(&self, category: &WorkTag) -> impl Iterator<Item = CandidateId> + '_ {
        let category = category.clone();
        self.candidates
            .iter()
            .filter(move |(_, candidate)| candidate.category == category)
            .map(|(id, _)| *id)
    }
}

impl WorldAccessor for TestWorld {
    fn current_tick(&self) -> u64 {
        self.tick
    }

    fn enumerate_candidates(
        &self,
        _map: MapId,
        category: &WorkTag,
    ) -> Result<Vec<CandidateId>, WorldQueryError> {
        self.enumerations.set(self.enumerations.get() + 1);
        if self.fail_enumeration {
            return Err(WorldQueryError::Query("test failure".into()));
        }
        Ok(self.matching(category).collect())
    }

    fn partition_count(&self, _map: MapId) -> usize {
        self.partitions.max(1)
    }

    fn enumerate_partition(
        &self,
        map: MapId,
        category: &WorkTag,
        partition: usize,
    ) -> Result<Vec<CandidateId>, WorldQueryError> {
        self.partition_scans.set(self.partition_scans.get() + 1);
        if self.fail_enumeration {
            return Err(WorldQueryError::Query("test failure".into()));
        }
        let count = self.partition_count(map);
        if partition >= count {
            return Err(WorldQueryError::PartitionOutOfRange { map, partition });
        }
        Ok(self
            .matching(category)
            .filter(|id| (id.0 as usize) % count == partition)
            .collect())
    }

    fn is_live(&self, candidate: CandidateId) -> bool {
        self.candidates
            .get(&candidate)
            .map(|c| c.live)
            .unwrap_or(false)
    }

    fn candidate_position(&self, candidate: CandidateId) -> Option<IVec2> {
        self.candidates.get(&candidate).map(|c| c.position)
    }
}

pub fn agent_at(id: u64, position: IVec2) -> Agent {
    Agent::new(AgentId(id), MapId(0), position)
}
