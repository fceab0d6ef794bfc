//! Agent descriptors: the registry's view of one agent

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

/// Health score given to agents that have not reported any outcome yet
pub const DEFAULT_HEALTH_SCORE: f64 = 0.5;

/// Static + dynamic description of a registered agent.
///
/// Created at registration and never removed during the process lifetime.
/// `health_score` and `average_latency` are only changed by the performance
/// tracker; routing code treats them as read-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub id: String,
    /// Human-readable name (defaults to the id)
    pub name: String,
    /// Capability tags, lowercase
    pub capabilities: BTreeSet<String>,
    /// Maximum in-flight tasks for this agent
    pub max_concurrency: usize,
    /// Exponentially smoothed reliability signal in [0, 1]
    pub health_score: f64,
    /// Exponentially smoothed execution latency
    pub average_latency: Duration,
    /// Explicit per-task timeout (otherwise derived from `average_latency`)
    pub task_timeout: Option<Duration>,
    /// Manually enabled / disabled
    pub enabled: bool,
    /// Excluded from lookup because health stayed below the floor
    pub excluded: bool,
}

impl AgentDescriptor {
    pub fn new<I, S>(id: &str, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            capabilities: capabilities
                .into_iter()
                .map(|c| normalize_tag(c.as_ref()))
                .filter(|c| !c.is_empty())
                .collect(),
            max_concurrency: 1,
            health_score: DEFAULT_HEALTH_SCORE,
            average_latency: Duration::from_secs(2),
            task_timeout: None,
            enabled: true,
            excluded: false,
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }

    /// Seed latency used before any observation arrives
    pub fn with_average_latency(mut self, latency: Duration) -> Self {
        self.average_latency = latency;
        self
    }

    /// Seed health used before any observation arrives (clamped to [0, 1])
    pub fn with_initial_health(mut self, health: f64) -> Self {
        self.health_score = clamp_unit(health);
        self
    }

    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = Some(timeout);
        self
    }

    pub fn has_capability(&self, tag: &str) -> bool {
        self.capabilities.contains(&normalize_tag(tag))
    }

    /// Eligible for routing: enabled and not excluded by the health floor
    pub fn is_routable(&self) -> bool {
        self.enabled && !self.excluded
    }
}

/// Lowercase + trim so tags compare case-insensitively
pub fn normalize_tag(tag: &str) -> String {
    tag.trim().to_lowercase()
}

pub(crate) fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capabilities_are_normalized() {
        let d = AgentDescriptor::new("math", ["Math ", "FINANCE", ""]);
        assert!(d.has_capability("math"));
        assert!(d.has_capability("Finance"));
        assert_eq!(d.capabilities.len(), 2);
    }

    #[test]
    fn initial_health_is_clamped() {
        let d = AgentDescriptor::new("a", ["x"]).with_initial_health(1.7);
        assert_eq!(d.health_score, 1.0);
        let d = AgentDescriptor::new("a", ["x"]).with_initial_health(f64::NAN);
        assert_eq!(d.health_score, 0.0);
    }

    #[test]
    fn routable_requires_enabled_and_not_excluded() {
        let mut d = AgentDescriptor::new("a", ["x"]);
        assert!(d.is_routable());
        d.excluded = true;
        assert!(!d.is_routable());
        d.excluded = false;
        d.enabled = false;
        assert!(!d.is_routable());
    }
}
