use std::collections::HashMap;

use crate::ids::{AgentId, WorkTag};
use crate::world::{Agent, HostPolicy};

#[derive(Debug, Clone, Copy)]
struct CachedEligibility {
    eligible: bool,
    computed_tick: u64,
}

impl CachedEligibility {
    fn is_fresh(&self, tick: u64, ttl_ticks: u64) -> bool {
        tick >= self.computed_tick && tick - self.computed_tick < ttl_ticks
    }
}

/// Short-lived memo of [`HostPolicy::agent_is_eligible`] per agent and work
/// category.
///
/// Expired entries are swept at most once per TTL window, so the map only
/// holds pairs queried within the last two windows.
#[derive(Debug, Default)]
pub struct EligibilityCache {
    entries: HashMap<(AgentId, WorkTag), CachedEligibility>,
    ttl_ticks: u64,
    last_prune_tick: u64,
}

impl EligibilityCache {
    pub fn new(ttl_ticks: u64) -> Self {
        Self {
            entries: HashMap::new(),
            ttl_ticks,
            last_prune_tick: 0,
        }
    }

    /// A zero TTL disables caching entirely.
    pub fn is_eligible(
        &mut self,
        policy: &dyn HostPolicy,
        agent: &Agent,
        work: &WorkTag,
        tick: u64,
    ) -> bool {
        if self.ttl_ticks == 0 {
            return policy.agent_is_eligible(agent, work);
        }
        let key = (agent.id, work.clone());
        if let Some(cached) = self.entries.get(&key) {
            if cached.is_fresh(tick, self.ttl_ticks) {
                return cached.eligible;
            }
        }
        self.prune_expired(tick);
        let eligible = policy.agent_is_eligible(agent, work);
        self.entries.insert(
            key,
            CachedEligibility {
                eligible,
                computed_tick: tick,
            },
        );
        eligible
    }

    fn prune_expired(&mut self, tick: u64) {
        if tick.saturating_sub(self.last_prune_tick) < self.ttl_ticks {
            return;
        }
        let ttl_ticks = self.ttl_ticks;
        self.entries.retain(|_, cached| cached.is_fresh(tick, ttl_ticks));
        self.last_prune_tick = tick;
    }

    pub fn forget_agent(&mut self, agent: AgentId) {
        self.entries.retain(|(id, _), _| *id != agent);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
