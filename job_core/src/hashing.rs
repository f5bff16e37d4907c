//! Stable hashing for the per-request seed that shuffles candidates within
//! a distance bucket.

use std::hash::Hasher;

use crate::ids::{AgentId, ProviderId};

/// A deterministic FNV-1a 64-bit hasher.
///
/// `DefaultHasher` is randomized per process, which would make provider
/// digests (and therefore selection order) differ between runs.
#[derive(Debug)]
pub struct FnvHasher {
    state: u64,
}

impl FnvHasher {
    const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;

    pub fn new() -> Self {
        Self {
            state: Self::OFFSET_BASIS,
        }
    }
}

impl Default for FnvHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl Hasher for FnvHasher {
    fn finish(&self) -> u64 {
        self.state
    }

    fn write(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.state ^= byte as u64;
            self.state = self.state.wrapping_mul(Self::PRIME);
        }
    }
}

/// Seed for the within-bucket shuffle of one selection query.
pub fn selection_seed(tick: u64, agent: AgentId, provider: &ProviderId) -> u64 {
    let agent_component = agent.0.wrapping_mul(0x9E37_79B9_7F4A_7C15);
    let tick_component = tick.wrapping_mul(0xC2B2_AE35);
    agent_component ^ tick_component ^ provider.stable_hash().rotate_left(17)
}
