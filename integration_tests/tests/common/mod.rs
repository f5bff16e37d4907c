#![allow(dead_code)]

use std::cell::Cell;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Once;

use bevy::math::IVec2;
use job_core::{
    Agent, AgentId, CandidateId, MapId, WorkTag, WorldAccessor, WorldQueryError,
    JOB_ENGINE_CONFIG_ENV,
};

static INIT: Once = Once::new();

/// Points `JOB_ENGINE_CONFIG_PATH` at the fixture config for this test binary.
pub fn ensure_test_config() -> PathBuf {
    let config_path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join("test_engine_config.json");
    INIT.call_once(|| {
        debug_assert!(
            config_path.exists(),
            "missing test engine config at {}",
            config_path.display()
        );
        std::env::set_var(JOB_ENGINE_CONFIG_ENV, &config_path);
    });
    config_path
}

#[derive(Debug, Clone)]
pub struct Spot {
    pub map: MapId,
    pub category: WorkTag,
    pub position: IVec2,
    pub live: bool,
}

/// Multi-map world whose candidates are kept in id order. Partitions split
/// candidates by id modulo the partition count.
#[derive(Debug, Default)]
pub struct GridWorld {
    pub tick: u64,
    pub partitions: usize,
    pub failing: bool,
    spots: BTreeMap<CandidateId, Spot>,
    next_id: u64,
    pub enumerations: Cell<usize>,
}

impl GridWorld {
    pub fn new() -> Self {
        Self {
            partitions: 1,
            ..Self::default()
        }
    }

    pub fn spawn(&mut self, map: MapId, category: &str, position: IVec2) -> CandidateId {
        let id = CandidateId(self.next_id);
        self.next_id += 1;
        self.spots.insert(
            id,
            Spot {
                map,
                category: WorkTag::new(category),
                position,
                live: true,
            },
        );
        id
    }

    pub fn despawn(&mut self, id: CandidateId) {
        if let Some(spot) = self.spots.get_mut(&id) {
            spot.live = false;
        }
    }

    /// Spawns `count` candidates along the x axis starting at `start`.
    pub fn spawn_row(&mut self, map: MapId, category: &str, start: IVec2, count: usize) -> Vec<CandidateId> {
        (0..count as i32)
            .map(|offset| self.spawn(map, category, start + IVec2::new(offset, 0)))
            .collect()
    }

    pub fn enumeration_count(&self) -> usize {
        self.enumerations.get()
    }

    fn matching(&self, map: MapId, category: &WorkTag) -> impl Iterator<Item = CandidateId> + '_ {
        let category = category.clone();
        self.spots
            .iter()
            .filter(move |(_, spot)| spot.map == map && spot.category == category && spot.live)
            .map(|(id, _)| *id)
    }
}

impl WorldAccessor for GridWorld {
    fn current_tick(&self) -> u64 {
        self.tick
    }

    fn enumerate_candidates(
        &self,
        map: MapId,
        category: &WorkTag,
    ) -> Result<Vec<CandidateId>, WorldQueryError> {
        self.enumerations.set(self.enumerations.get() + 1);
        if self.failing {
            return Err(WorldQueryError::Query("region index rebuilding".into()));
        }
        Ok(self.matching(map, category).collect())
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
        let count = self.partition_count(map);
        if partition >= count {
            return Err(WorldQueryError::PartitionOutOfRange { map, partition });
        }
        if self.failing {
            return Err(WorldQueryError::Query("region index rebuilding".into()));
        }
        Ok(self
            .matching(map, category)
            .filter(|id| (id.0 as usize) % count == partition)
            .collect())
    }

    fn is_live(&self, candidate: CandidateId) -> bool {
        self.spots.get(&candidate).is_some_and(|spot| spot.live)
    }

    fn candidate_position(&self, candidate: CandidateId) -> Option<IVec2> {
        self.spots.get(&candidate).map(|spot| spot.position)
    }
}

pub fn worker(id: u64, map: MapId, position: IVec2, work: &str) -> Agent {
    Agent::new(AgentId(id), map, position).with_work(work)
}

pub fn accept_all(_candidate: CandidateId, _agent: &Agent) -> bool {
    true
}
