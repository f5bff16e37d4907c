//! Nearest-band-first greedy selection.

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::buckets::DistanceBuckets;
use crate::hashing::selection_seed;
use crate::ids::{CandidateId, ProviderId};
use crate::reachability::MemoScope;
use crate::world::Agent;

/// Domain check deciding whether an agent can take a candidate
/// (forbidden, claimed, reachable, ...). Usually expensive.
pub trait Validator {
    fn validate(&self, candidate: CandidateId, agent: &Agent) -> bool;
}

impl<F> Validator for F
where
    F: Fn(CandidateId, &Agent) -> bool,
{
    fn validate(&self, candidate: CandidateId, agent: &Agent) -> bool {
        self(candidate, agent)
    }
}

/// Replayable RNG for one `(tick, agent, provider)` query.
pub fn selection_rng(tick: u64, agent: &Agent, provider: &ProviderId) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(selection_seed(tick, agent.id, provider))
}

/// Walks buckets nearest first, shuffling inside each band so agents
/// querying the same tick spread over equally near candidates. The memo is
/// consulted before the validator and filled after it. Returns the first
/// candidate that validates.
pub fn select_first_valid<V, R>(
    mut buckets: DistanceBuckets,
    agent: &Agent,
    validator: &V,
    mut memo: Option<MemoScope<'_>>,
    rng: &mut R,
) -> Option<CandidateId>
where
    V: Validator + ?Sized,
    R: Rng + ?Sized,
{
    for bucket in buckets.buckets_mut() {
        if bucket.is_empty() {
            continue;
        }
        bucket.shuffle(rng);
        for &candidate in bucket.iter() {
            let valid = match memo.as_mut().and_then(|scope| scope.try_get(candidate)) {
                Some(known) => known,
                None => {
                    let outcome = validator.validate(candidate, agent);
                    if let Some(scope) = memo.as_mut() {
                        scope.set(candidate, outcome);
                    }
                    outcome
                }
            };
            if valid {
                return Some(candidate);
            }
        }
    }
    None
}
