use std::{cell::Cell, path::PathBuf, sync::Arc, time::Instant};

use anyhow::{Context, Result};
use bevy::math::IVec2;
use clap::Parser;
use job_core::{
    category_source, Agent, AgentId, CandidateId, CategorySource, DefaultHostPolicy,
    EngineConfig, EngineMetrics, JobEngine, JobRequest, MapId, ProviderId, ProviderMetadata,
    WorkTag, WorldAccessor, WorldQueryError,
};
use rand::{rngs::SmallRng, Rng, SeedableRng};
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Soak test for the job assignment engine", long_about = None)]
struct Args {
    /// Number of ticks to run
    #[arg(long, default_value_t = 600)]
    ticks: u64,

    /// Agents per map
    #[arg(long, default_value_t = 40)]
    agents: u32,

    /// Candidates per category per map
    #[arg(long, default_value_t = 2000)]
    candidates: u32,

    #[arg(long, default_value_t = 2)]
    maps: u32,

    /// Spatial partitions per map for progressive providers
    #[arg(long, default_value_t = 16)]
    partitions: usize,

    /// Side length of each square map
    #[arg(long, default_value_t = 250)]
    map_size: i32,

    /// Fraction of candidates replaced every tick
    #[arg(long, default_value_t = 0.01)]
    churn: f64,

    #[arg(long, default_value_t = 7)]
    seed: u64,

    /// Engine config JSON (defaults to JOB_ENGINE_CONFIG_PATH or builtin)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Pretty-print the JSON report
    #[arg(long)]
    pretty: bool,
}

const CATEGORIES: [&str; 3] = ["haulable", "blueprint", "filth"];

struct Spot {
    map: MapId,
    category: usize,
    position: IVec2,
    live: bool,
}

/// Square maps of scattered candidates, partitioned into horizontal strips.
struct SoakWorld {
    tick: u64,
    map_size: i32,
    partitions: usize,
    spots: Vec<Spot>,
    enumerations: Cell<u64>,
}

impl SoakWorld {
    fn generate(args: &Args, rng: &mut SmallRng) -> Self {
        let mut spots = Vec::new();
        for map in 0..args.maps {
            for category in 0..CATEGORIES.len() {
                for _ in 0..args.candidates {
                    spots.push(Spot {
                        map: MapId(map),
                        category,
                        position: random_cell(rng, args.map_size),
                        live: true,
                    });
                }
            }
        }
        Self {
            tick: 0,
            map_size: args.map_size.max(1),
            partitions: args.partitions.max(1),
            spots,
            enumerations: Cell::new(0),
        }
    }

    /// Destroys a random sample of candidates and spawns replacements.
    fn churn(&mut self, rng: &mut SmallRng, fraction: f64) {
        let count = (self.spots.len() as f64 * fraction) as usize;
        for _ in 0..count {
            let index = rng.gen_range(0..self.spots.len());
            let spot = &self.spots[index];
            if !spot.live {
                continue;
            }
            let (map, category) = (spot.map, spot.category);
            self.spots[index].live = false;
            let position = random_cell(rng, self.map_size);
            self.spots.push(Spot {
                map,
                category,
                position,
                live: true,
            });
        }
    }

    fn category_index(category: &WorkTag) -> Result<usize, WorldQueryError> {
        CATEGORIES
            .iter()
            .position(|name| *name == category.as_str())
            .ok_or_else(|| WorldQueryError::Query(format!("unknown category {category}")))
    }

    fn strip_of(&self, position: IVec2) -> usize {
        let strip_height = (self.map_size as usize).div_ceil(self.partitions).max(1);
        (position.y.max(0) as usize / strip_height).min(self.partitions - 1)
    }

    fn spot(&self, candidate: CandidateId) -> Option<&Spot> {
        self.spots.get(candidate.0 as usize)
    }
}

impl WorldAccessor for SoakWorld {
    fn current_tick(&self) -> u64 {
        self.tick
    }

    fn enumerate_candidates(
        &self,
        map: MapId,
        category: &WorkTag,
    ) -> Result<Vec<CandidateId>, WorldQueryError> {
        self.enumerations.set(self.enumerations.get() + 1);
        let category = Self::category_index(category)?;
        Ok(self
            .spots
            .iter()
            .enumerate()
            .filter(|(_, spot)| spot.live && spot.map == map && spot.category == category)
            .map(|(index, _)| CandidateId(index as u64))
            .collect())
    }

    fn partition_count(&self, _map: MapId) -> usize {
        self.partitions
    }

    fn enumerate_partition(
        &self,
        map: MapId,
        category: &WorkTag,
        partition: usize,
    ) -> Result<Vec<CandidateId>, WorldQueryError> {
        if partition >= self.partitions {
            return Err(WorldQueryError::PartitionOutOfRange { map, partition });
        }
        self.enumerations.set(self.enumerations.get() + 1);
        let category = Self::category_index(category)?;
        Ok(self
            .spots
            .iter()
            .enumerate()
            .filter(|(_, spot)| {
                spot.live
                    && spot.map == map
                    && spot.category == category
                    && self.strip_of(spot.position) == partition
            })
            .map(|(index, _)| CandidateId(index as u64))
            .collect())
    }

    fn is_live(&self, candidate: CandidateId) -> bool {
        self.spot(candidate).is_some_and(|spot| spot.live)
    }

    fn candidate_position(&self, candidate: CandidateId) -> Option<IVec2> {
        self.spot(candidate).map(|spot| spot.position)
    }
}

fn random_cell(rng: &mut SmallRng, map_size: i32) -> IVec2 {
    let side = map_size.max(1);
    IVec2::new(rng.gen_range(0..side), rng.gen_range(0..side))
}

type SoakSource = CategorySource<fn(&dyn WorldAccessor, CandidateId) -> bool>;

struct SoakProvider {
    id: ProviderId,
    work: WorkTag,
    source: SoakSource,
}

fn register_providers(engine: &mut JobEngine) -> Vec<SoakProvider> {
    engine.register_provider(
        "haul.general",
        ProviderMetadata::new("hauling").priority(10).refresh_every(120),
    );
    engine.register_provider(
        "construct.blueprints",
        ProviderMetadata::new("construction")
            .priority(20)
            .requires("builder")
            .depends_on("haul.general"),
    );
    engine.register_provider(
        "clean.filth",
        ProviderMetadata::new("cleaning").max_candidates(128),
    );

    vec![
        SoakProvider {
            id: ProviderId::new("haul.general"),
            work: WorkTag::new("hauling"),
            source: category_source("haulable"),
        },
        SoakProvider {
            id: ProviderId::new("construct.blueprints"),
            work: WorkTag::new("construction"),
            source: category_source("blueprint").progressive(),
        },
        SoakProvider {
            id: ProviderId::new("clean.filth"),
            work: WorkTag::new("cleaning"),
            source: category_source("filth"),
        },
    ]
}

fn spawn_agents(args: &Args, rng: &mut SmallRng) -> Vec<Agent> {
    let mut agents = Vec::new();
    for map in 0..args.maps {
        for index in 0..args.agents {
            let id = AgentId(u64::from(map) * 1_000_000 + u64::from(index));
            let mut agent = Agent::new(id, MapId(map), random_cell(rng, args.map_size))
                .with_work("hauling")
                .with_work("cleaning");
            if index % 3 == 0 {
                agent = agent.with_work("construction").with_capability("builder");
            }
            agents.push(agent);
        }
    }
    agents
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let mut engine = match &args.config {
        Some(path) => {
            let config = EngineConfig::from_file(path)
                .with_context(|| format!("Failed to load engine config at {}", path.display()))?;
            JobEngine::new(Arc::new(config))
        }
        None => JobEngine::from_env(),
    };
    let mut rng = SmallRng::seed_from_u64(args.seed);
    let mut world = SoakWorld::generate(&args, &mut rng);
    let mut agents = spawn_agents(&args, &mut rng);
    let providers = register_providers(&mut engine);
    for map in 0..args.maps {
        engine.on_map_finalized(MapId(map));
    }

    let mut assignments = 0u64;
    let started = Instant::now();
    for tick in 0..args.ticks {
        world.tick = tick;
        world.churn(&mut rng, args.churn);
        // Mid-run, hauling stops on the last map; construction there stalls.
        if tick == args.ticks / 2 && args.maps > 1 {
            engine
                .registry_mut()
                .deactivate("haul.general", MapId(args.maps - 1));
        }

        for agent in &mut agents {
            for provider in &providers {
                let job = engine.standard_try_give_job(
                    &world,
                    &DefaultHostPolicy,
                    agent,
                    &provider.work,
                    JobRequest::for_provider(provider.id.clone()),
                    |ctx, agent| Ok(ctx.find_target(agent, &provider.source, &reachable)),
                );
                if let Some(target) = job {
                    assignments += 1;
                    if let Some(position) = world.candidate_position(target) {
                        agent.position = position;
                    }
                    break;
                }
            }
        }
    }
    let elapsed = started.elapsed();
    info!(
        target: "soak_harness",
        ticks = args.ticks,
        assignments,
        elapsed_ms = elapsed.as_secs_f64() * 1_000.0,
        "soak.finished"
    );

    let report = json!({
        "ticks": args.ticks,
        "agents": agents.len(),
        "assignments": assignments,
        "enumerations": world.enumerations.get(),
        "elapsed_ms": elapsed.as_secs_f64() * 1_000.0,
        "metrics": EngineMetrics::capture(&engine),
    });
    let rendered = if args.pretty {
        serde_json::to_string_pretty(&report)?
    } else {
        serde_json::to_string(&report)?
    };
    println!("{rendered}");
    Ok(())
}

/// Stand-in for a pathing check: every seventh candidate is only reachable
/// from even columns.
fn reachable(candidate: CandidateId, agent: &Agent) -> bool {
    candidate.0 % 7 != 0 || agent.position.x % 2 == 0
}
