use bevy::math::IVec2;

use crate::ids::CandidateId;
use crate::world::{distance_squared, Agent, WorldAccessor};

/// Candidates partitioned into concentric squared-distance bands.
///
/// Bucket `i` holds candidates with squared distance below `thresholds[i]`
/// (and at or above `thresholds[i - 1]`); the final bucket catches the rest.
/// Built per query and never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistanceBuckets {
    buckets: Vec<Vec<CandidateId>>,
}

impl DistanceBuckets {
    /// Assigns each live, positioned candidate to its band around `origin`.
    /// Input order is preserved within a band.
    pub fn build(
        origin: IVec2,
        candidates: &[CandidateId],
        thresholds: &[i64],
        world: &dyn WorldAccessor,
    ) -> Self {
        debug_assert!(
            thresholds.windows(2).all(|pair| pair[0] < pair[1]),
            "distance thresholds must be ascending"
        );
        let mut buckets = vec![Vec::new(); thresholds.len() + 1];
        for &candidate in candidates {
            if !world.is_live(candidate) {
                continue;
            }
            let Some(position) = world.candidate_position(candidate) else {
                continue;
            };
            let dist = distance_squared(origin, position);
            let index = thresholds.partition_point(|threshold| *threshold <= dist);
            buckets[index].push(candidate);
        }
        Self { buckets }
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// True when no bucket holds a candidate.
    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(Vec::is_empty)
    }

    pub fn total(&self) -> usize {
        self.buckets.iter().map(Vec::len).sum()
    }

    pub fn bucket(&self, index: usize) -> &[CandidateId] {
        self.buckets
            .get(index)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = &[CandidateId]> {
        self.buckets.iter().map(Vec::as_slice)
    }

    pub(crate) fn buckets_mut(&mut self) -> &mut [Vec<CandidateId>] {
        &mut self.buckets
    }
}

/// [`DistanceBuckets::build`] centered on the agent.
pub fn build_distance_buckets(
    agent: &Agent,
    candidates: &[CandidateId],
    thresholds: &[i64],
    world: &dyn WorldAccessor,
) -> DistanceBuckets {
    DistanceBuckets::build(agent.position, candidates, thresholds, world)
}
