use bevy::math::IVec2;
use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use job_core::{
    build_distance_buckets, category_source, select_first_valid, selection_rng, Agent, AgentId,
    CandidateId, DefaultHostPolicy, JobEngine, JobRequest, MapId, ProviderId, WorkTag,
    WorldAccessor, WorldQueryError,
};

const THRESHOLDS: [i64; 4] = [100, 400, 1600, 6400];

/// Candidates laid out on a square grid, spaced three cells apart.
struct GridWorld {
    side: i32,
}

impl GridWorld {
    fn position(&self, candidate: CandidateId) -> IVec2 {
        let index = candidate.0 as i32;
        IVec2::new(index % self.side, index / self.side) * 3
    }
}

impl WorldAccessor for GridWorld {
    fn current_tick(&self) -> u64 {
        0
    }

    fn enumerate_candidates(
        &self,
        _map: MapId,
        _category: &WorkTag,
    ) -> Result<Vec<CandidateId>, WorldQueryError> {
        Ok((0..(self.side * self.side) as u64).map(CandidateId).collect())
    }

    fn is_live(&self, _candidate: CandidateId) -> bool {
        true
    }

    fn candidate_position(&self, candidate: CandidateId) -> Option<IVec2> {
        Some(self.position(candidate))
    }
}

fn bench_selection(c: &mut Criterion) {
    let mut group = c.benchmark_group("select_first_valid");
    let provider = ProviderId::new("bench.haul");

    for side in [16i32, 32, 64] {
        let world = GridWorld { side };
        let candidates = world
            .enumerate_candidates(MapId(0), &WorkTag::new("haul"))
            .unwrap_or_default();
        let agent = Agent::new(AgentId(1), MapId(0), IVec2::splat(side * 3 / 2));
        // Only the far corner validates so the walk covers most buckets.
        let target = CandidateId((side * side - 1) as u64);

        group.bench_with_input(BenchmarkId::new("grid", side), &side, |b, _| {
            b.iter_batched(
                || build_distance_buckets(&agent, &candidates, &THRESHOLDS, &world),
                |buckets| {
                    let mut rng = selection_rng(0, &agent, &provider);
                    let validator = |candidate: CandidateId, _: &Agent| candidate == target;
                    select_first_valid(buckets, &agent, &validator, None, &mut rng)
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

fn bench_pipeline(c: &mut Criterion) {
    let world = GridWorld { side: 64 };
    let work = WorkTag::new("hauling");
    let agent = Agent::new(AgentId(1), MapId(0), IVec2::new(10, 10)).with_work("hauling");
    let mut engine = JobEngine::default();
    let source = category_source("haul");

    c.bench_function("standard_try_give_job/warm_cache", |b| {
        b.iter(|| {
            engine.standard_try_give_job(
                &world,
                &DefaultHostPolicy,
                &agent,
                &work,
                JobRequest::for_provider("bench.haul"),
                |ctx, agent| {
                    Ok(ctx.find_target(agent, &source, &|_: CandidateId, _: &Agent| true))
                },
            )
        })
    });
}

criterion_group!(selector_benches, bench_selection, bench_pipeline);
criterion_main!(selector_benches);
