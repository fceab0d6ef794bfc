//! Agent Registry
//!
//! Table of agent descriptors keyed by id. Each agent gets its own
//! concurrency semaphore sized by `max_concurrency`.
//!
//! Entries live in a `DashMap`, so health writes for one agent lock only that
//! agent's shard and routing reads never wait on a registry-wide lock.

use dashmap::DashMap;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::descriptor::{clamp_unit, normalize_tag, AgentDescriptor};
use crate::error::{ConductorError, Result};

/// Mutable health bookkeeping kept next to the descriptor
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct HealthStreak {
    /// Consecutive observations that left the score below the floor
    pub below_floor: u32,
}

struct AgentEntry {
    descriptor: AgentDescriptor,
    semaphore: Arc<Semaphore>,
    streak: HealthStreak,
}

/// Registry-wide health summary
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryHealth {
    pub total: usize,
    pub routable: usize,
    pub disabled: usize,
    pub excluded: usize,
    pub mean_health: f64,
}

/// Agent registry
#[derive(Default)]
pub struct AgentRegistry {
    entries: DashMap<String, AgentEntry>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Register a new agent. Ids must be unique.
    pub fn register(&self, mut descriptor: AgentDescriptor) -> Result<()> {
        if descriptor.id.trim().is_empty() {
            return Err(ConductorError::Validation(
                "agent id must not be empty".to_string(),
            ));
        }
        if descriptor.max_concurrency == 0 {
            return Err(ConductorError::Validation(format!(
                "agent {} must allow at least one concurrent task",
                descriptor.id
            )));
        }
        descriptor.health_score = clamp_unit(descriptor.health_score);

        let id = descriptor.id.clone();
        match self.entries.entry(id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(ConductorError::DuplicateAgent(id)),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                info!(
                    agent_id = %id,
                    capabilities = ?descriptor.capabilities,
                    max_concurrency = descriptor.max_concurrency,
                    "Registering agent"
                );
                let semaphore = Arc::new(Semaphore::new(descriptor.max_concurrency));
                slot.insert(AgentEntry {
                    descriptor,
                    semaphore,
                    streak: HealthStreak::default(),
                });
                Ok(())
            }
        }
    }

    pub fn contains(&self, agent_id: &str) -> bool {
        self.entries.contains_key(agent_id)
    }

    /// Snapshot of one descriptor
    pub fn get(&self, agent_id: &str) -> Result<AgentDescriptor> {
        self.entries
            .get(agent_id)
            .map(|e| e.descriptor.clone())
            .ok_or_else(|| ConductorError::UnknownAgent(agent_id.to_string()))
    }

    pub fn is_routable(&self, agent_id: &str) -> bool {
        self.entries
            .get(agent_id)
            .map(|e| e.descriptor.is_routable())
            .unwrap_or(false)
    }

    /// Routable agents carrying `tag`, best first.
    ///
    /// Ordered by health descending, then average latency ascending, then id
    /// so equal candidates always come back in the same order.
    pub fn lookup(&self, tag: &str) -> Vec<AgentDescriptor> {
        let tag = normalize_tag(tag);
        let mut found: Vec<AgentDescriptor> = self
            .entries
            .iter()
            .filter(|e| e.descriptor.is_routable() && e.descriptor.capabilities.contains(&tag))
            .map(|e| e.descriptor.clone())
            .collect();
        sort_for_routing(&mut found);
        debug!(tag = %tag, candidates = found.len(), "Registry lookup");
        found
    }

    /// Manually take an agent out of routing
    pub fn disable(&self, agent_id: &str) -> Result<()> {
        let mut entry = self
            .entries
            .get_mut(agent_id)
            .ok_or_else(|| ConductorError::UnknownAgent(agent_id.to_string()))?;
        entry.descriptor.enabled = false;
        info!(agent_id = %agent_id, "Disabled agent");
        Ok(())
    }

    /// Put an agent back into routing.
    ///
    /// Also lifts a health exclusion and resets the below-floor streak; the
    /// score itself is left to the tracker.
    pub fn enable(&self, agent_id: &str) -> Result<()> {
        let mut entry = self
            .entries
            .get_mut(agent_id)
            .ok_or_else(|| ConductorError::UnknownAgent(agent_id.to_string()))?;
        entry.descriptor.enabled = true;
        if entry.descriptor.excluded {
            warn!(
                agent_id = %agent_id,
                health = entry.descriptor.health_score,
                "Re-enabling agent excluded by health floor"
            );
        }
        entry.descriptor.excluded = false;
        entry.streak = HealthStreak::default();
        info!(agent_id = %agent_id, "Enabled agent");
        Ok(())
    }

    /// Per-agent concurrency semaphore
    pub fn semaphore(&self, agent_id: &str) -> Result<Arc<Semaphore>> {
        self.entries
            .get(agent_id)
            .map(|e| Arc::clone(&e.semaphore))
            .ok_or_else(|| ConductorError::UnknownAgent(agent_id.to_string()))
    }

    /// Copy of every descriptor, sorted by id
    pub fn snapshot(&self) -> Vec<AgentDescriptor> {
        let mut all: Vec<AgentDescriptor> =
            self.entries.iter().map(|e| e.descriptor.clone()).collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn health_report(&self) -> RegistryHealth {
        let snapshot = self.snapshot();
        let total = snapshot.len();
        let mean_health = if total == 0 {
            0.0
        } else {
            snapshot.iter().map(|d| d.health_score).sum::<f64>() / total as f64
        };
        RegistryHealth {
            total,
            routable: snapshot.iter().filter(|d| d.is_routable()).count(),
            disabled: snapshot.iter().filter(|d| !d.enabled).count(),
            excluded: snapshot.iter().filter(|d| d.excluded).count(),
            mean_health,
        }
    }

    /// Apply a health/latency update under the agent's entry lock.
    ///
    /// Only the performance tracker calls this.
    pub(crate) fn update_health<R>(
        &self,
        agent_id: &str,
        f: impl FnOnce(&mut AgentDescriptor, &mut HealthStreak) -> R,
    ) -> Result<R> {
        let mut entry = self
            .entries
            .get_mut(agent_id)
            .ok_or_else(|| ConductorError::UnknownAgent(agent_id.to_string()))?;
        let AgentEntry {
            descriptor, streak, ..
        } = &mut *entry;
        let out = f(descriptor, streak);
        descriptor.health_score = clamp_unit(descriptor.health_score);
        Ok(out)
    }
}

/// Routing order: health desc, latency asc, id asc
pub fn sort_for_routing(agents: &mut [AgentDescriptor]) {
    agents.sort_by_key(|d| {
        (
            Reverse(OrderedFloat(d.health_score)),
            d.average_latency,
            d.id.clone(),
        )
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn registry() -> AgentRegistry {
        let registry = AgentRegistry::new();
        registry
            .register(
                AgentDescriptor::new("research_a", ["research"])
                    .with_initial_health(0.9)
                    .with_average_latency(Duration::from_millis(900)),
            )
            .unwrap();
        registry
            .register(
                AgentDescriptor::new("research_b", ["research"])
                    .with_initial_health(0.9)
                    .with_average_latency(Duration::from_millis(300)),
            )
            .unwrap();
        registry
            .register(AgentDescriptor::new("research_c", ["research", "math"]).with_initial_health(0.4))
            .unwrap();
        registry
    }

    #[test]
    fn lookup_orders_by_health_then_latency() {
        let registry = registry();
        let ids: Vec<String> = registry
            .lookup("Research")
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(ids, vec!["research_b", "research_a", "research_c"]);
    }

    #[test]
    fn duplicate_registration_rejected() {
        let registry = registry();
        let err = registry
            .register(AgentDescriptor::new("research_a", ["research"]))
            .unwrap_err();
        assert!(matches!(err, ConductorError::DuplicateAgent(id) if id == "research_a"));
    }

    #[test]
    fn zero_concurrency_rejected() {
        let registry = AgentRegistry::new();
        let err = registry
            .register(AgentDescriptor::new("a", ["x"]).with_max_concurrency(0))
            .unwrap_err();
        assert!(matches!(err, ConductorError::Validation(_)));
    }

    #[test]
    fn disable_and_enable() {
        let registry = registry();
        registry.disable("research_b").unwrap();
        assert!(!registry.lookup("research").iter().any(|d| d.id == "research_b"));

        registry.enable("research_b").unwrap();
        assert!(registry.lookup("research").iter().any(|d| d.id == "research_b"));

        assert!(matches!(
            registry.disable("nope"),
            Err(ConductorError::UnknownAgent(_))
        ));
    }

    #[test]
    fn enable_lifts_health_exclusion() {
        let registry = registry();
        registry
            .update_health("research_c", |d, streak| {
                d.excluded = true;
                streak.below_floor = 4;
            })
            .unwrap();
        assert!(registry.lookup("math").is_empty());

        registry.enable("research_c").unwrap();
        assert_eq!(registry.lookup("math").len(), 1);
    }

    #[test]
    fn health_report_counts() {
        let registry = registry();
        registry.disable("research_a").unwrap();
        let report = registry.health_report();
        assert_eq!(report.total, 3);
        assert_eq!(report.routable, 2);
        assert_eq!(report.disabled, 1);
        assert_eq!(report.excluded, 0);
        assert!((report.mean_health - (0.9 + 0.9 + 0.4) / 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn semaphore_matches_max_concurrency() {
        let registry = AgentRegistry::new();
        registry
            .register(AgentDescriptor::new("a", ["x"]).with_max_concurrency(2))
            .unwrap();
        let sem = registry.semaphore("a").unwrap();
        assert_eq!(sem.available_permits(), 2);
        let _p1 = sem.clone().acquire_owned().await.unwrap();
        assert_eq!(registry.semaphore("a").unwrap().available_permits(), 1);
    }
}
