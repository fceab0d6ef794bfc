//! Per-agent performance tracker
//!
//! Observes every task terminal transition and folds it into the agent's
//! descriptor: an exponential moving average for health and latency, plus
//! exclusion from lookup once health stays under the floor.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{ConductorError, Result};
use crate::registry::AgentRegistry;

/// Tracker tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// EMA smoothing factor in (0, 1]
    pub alpha: f64,
    /// Health below this counts toward exclusion
    pub exclusion_floor: f64,
    /// Consecutive below-floor observations before the agent leaves lookup
    pub exclusion_after: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            alpha: 0.2,
            exclusion_floor: 0.3,
            exclusion_after: 3,
        }
    }
}

impl TrackerConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.alpha > 0.0 && self.alpha <= 1.0) {
            return Err(ConductorError::Validation(format!(
                "tracker.alpha must be in (0, 1], got {}",
                self.alpha
            )));
        }
        if !(0.0..=1.0).contains(&self.exclusion_floor) {
            return Err(ConductorError::Validation(format!(
                "tracker.exclusion_floor must be in [0, 1], got {}",
                self.exclusion_floor
            )));
        }
        if self.exclusion_after == 0 {
            return Err(ConductorError::Validation(
                "tracker.exclusion_after must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// How a task ended, from the agent's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Success,
    Failure,
    /// Cancelled before the agent was invoked; does not move health
    Skipped,
}

impl Outcome {
    fn target(&self) -> Option<f64> {
        match self {
            Outcome::Success => Some(1.0),
            Outcome::Failure => Some(0.0),
            Outcome::Skipped => None,
        }
    }
}

/// Result of folding one observation into an agent's health
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthUpdate {
    pub agent_id: String,
    pub previous: f64,
    pub current: f64,
    pub average_latency: Duration,
    pub excluded: bool,
    /// This observation pushed the agent out of lookup
    pub newly_excluded: bool,
    /// This observation brought the agent back above the floor
    pub recovered: bool,
}

/// Running counters for one agent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentStats {
    pub agent_id: String,
    pub invocations: u64,
    pub successes: u64,
    pub failures: u64,
    pub skipped: u64,
    pub total_latency_ms: u64,
    pub last_observed_at: Option<DateTime<Utc>>,
}

impl AgentStats {
    pub fn success_rate(&self) -> f64 {
        let finished = self.successes + self.failures;
        if finished == 0 {
            return 0.0;
        }
        self.successes as f64 / finished as f64
    }

    pub fn mean_latency_ms(&self) -> f64 {
        let finished = self.successes + self.failures;
        if finished == 0 {
            return 0.0;
        }
        self.total_latency_ms as f64 / finished as f64
    }
}

/// `old * (1 - alpha) + target * alpha`
pub fn ema(old: f64, target: f64, alpha: f64) -> f64 {
    old * (1.0 - alpha) + target * alpha
}

fn ema_duration(old: Duration, sample: Duration, alpha: f64) -> Duration {
    let secs = ema(old.as_secs_f64(), sample.as_secs_f64(), alpha);
    Duration::from_secs_f64(secs.max(0.0))
}

/// Tracks performance for all agents and feeds health back to the registry
pub struct PerformanceTracker {
    config: TrackerConfig,
    registry: Arc<AgentRegistry>,
    stats: DashMap<String, AgentStats>,
}

impl PerformanceTracker {
    pub fn new(config: TrackerConfig, registry: Arc<AgentRegistry>) -> Self {
        Self {
            config,
            registry,
            stats: DashMap::new(),
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Record one terminal transition.
    ///
    /// Returns `None` for `Outcome::Skipped`, which only bumps counters.
    pub fn record(
        &self,
        agent_id: &str,
        outcome: Outcome,
        latency: Duration,
    ) -> Result<Option<HealthUpdate>> {
        if !self.registry.contains(agent_id) {
            return Err(ConductorError::UnknownAgent(agent_id.to_string()));
        }
        self.bump_stats(agent_id, outcome, latency);

        let Some(target) = outcome.target() else {
            debug!(agent_id = %agent_id, "Task skipped before invocation; health unchanged");
            return Ok(None);
        };

        let alpha = self.config.alpha;
        let floor = self.config.exclusion_floor;
        let exclusion_after = self.config.exclusion_after;

        let update = self.registry.update_health(agent_id, |descriptor, streak| {
            let previous = descriptor.health_score;
            descriptor.health_score = ema(previous, target, alpha).clamp(0.0, 1.0);
            descriptor.average_latency = ema_duration(descriptor.average_latency, latency, alpha);

            let mut newly_excluded = false;
            let mut recovered = false;
            if descriptor.health_score < floor {
                streak.below_floor += 1;
                if streak.below_floor >= exclusion_after && !descriptor.excluded {
                    descriptor.excluded = true;
                    newly_excluded = true;
                }
            } else {
                streak.below_floor = 0;
                if descriptor.excluded {
                    descriptor.excluded = false;
                    recovered = true;
                }
            }

            HealthUpdate {
                agent_id: descriptor.id.clone(),
                previous,
                current: descriptor.health_score,
                average_latency: descriptor.average_latency,
                excluded: descriptor.excluded,
                newly_excluded,
                recovered,
            }
        })?;

        if update.newly_excluded {
            warn!(
                agent_id = %agent_id,
                health = update.current,
                floor,
                "Agent health below floor; excluding from routing"
            );
        } else if update.recovered {
            info!(agent_id = %agent_id, health = update.current, "Agent recovered above health floor");
        } else {
            debug!(
                agent_id = %agent_id,
                ?outcome,
                previous = update.previous,
                current = update.current,
                latency_ms = latency.as_millis() as u64,
                "Health updated"
            );
        }

        Ok(Some(update))
    }

    fn bump_stats(&self, agent_id: &str, outcome: Outcome, latency: Duration) {
        let mut stats = self
            .stats
            .entry(agent_id.to_string())
            .or_insert_with(|| AgentStats {
                agent_id: agent_id.to_string(),
                ..AgentStats::default()
            });
        match outcome {
            Outcome::Success => {
                stats.invocations += 1;
                stats.successes += 1;
                stats.total_latency_ms += latency.as_millis() as u64;
            }
            Outcome::Failure => {
                stats.invocations += 1;
                stats.failures += 1;
                stats.total_latency_ms += latency.as_millis() as u64;
            }
            Outcome::Skipped => stats.skipped += 1,
        }
        stats.last_observed_at = Some(Utc::now());
    }

    /// Counters for one agent
    pub fn stats(&self, agent_id: &str) -> Option<AgentStats> {
        self.stats.get(agent_id).map(|s| s.clone())
    }

    /// Counters for every observed agent, sorted by id
    pub fn all_stats(&self) -> Vec<AgentStats> {
        let mut all: Vec<AgentStats> = self.stats.iter().map(|s| s.clone()).collect();
        all.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::AgentDescriptor;

    fn setup() -> (Arc<AgentRegistry>, PerformanceTracker) {
        let registry = Arc::new(AgentRegistry::new());
        registry
            .register(
                AgentDescriptor::new("math", ["math"])
                    .with_average_latency(Duration::from_millis(1000)),
            )
            .unwrap();
        let tracker = PerformanceTracker::new(TrackerConfig::default(), Arc::clone(&registry));
        (registry, tracker)
    }

    #[test]
    fn ema_moves_toward_outcome() {
        assert!((ema(0.5, 1.0, 0.2) - 0.6).abs() < 1e-12);
        assert!((ema(0.5, 0.0, 0.2) - 0.4).abs() < 1e-12);
    }

    #[test]
    fn ten_successes_approach_one() {
        let (registry, tracker) = setup();
        let mut last = 0.5;
        for _ in 0..10 {
            let update = tracker
                .record("math", Outcome::Success, Duration::from_millis(100))
                .unwrap()
                .unwrap();
            assert!(update.current > last);
            last = update.current;
        }
        let health = registry.get("math").unwrap().health_score;
        assert!(health > 0.94 && health <= 1.0, "health = {health}");
    }

    #[test]
    fn ten_failures_drop_below_floor_and_exclude() {
        let (registry, tracker) = setup();
        for _ in 0..10 {
            tracker
                .record("math", Outcome::Failure, Duration::from_millis(100))
                .unwrap();
        }
        let d = registry.get("math").unwrap();
        assert!(d.health_score < 0.3, "health = {}", d.health_score);
        assert!(d.excluded);
        assert!(registry.lookup("math").is_empty());
    }

    #[test]
    fn exclusion_needs_consecutive_low_readings() {
        let (registry, tracker) = setup();
        // 0.5 -> 0.4 -> 0.32 -> 0.256 (1st below floor) -> 0.2048 (2nd)
        for _ in 0..4 {
            tracker
                .record("math", Outcome::Failure, Duration::from_millis(10))
                .unwrap();
        }
        assert!(!registry.get("math").unwrap().excluded);

        let update = tracker
            .record("math", Outcome::Failure, Duration::from_millis(10))
            .unwrap()
            .unwrap();
        assert!(update.newly_excluded);
    }

    #[test]
    fn recovery_above_floor_restores_lookup() {
        let (registry, tracker) = setup();
        for _ in 0..6 {
            tracker
                .record("math", Outcome::Failure, Duration::from_millis(10))
                .unwrap();
        }
        assert!(registry.get("math").unwrap().excluded);

        let mut recovered = false;
        for _ in 0..5 {
            let update = tracker
                .record("math", Outcome::Success, Duration::from_millis(10))
                .unwrap()
                .unwrap();
            recovered |= update.recovered;
        }
        assert!(recovered);
        assert_eq!(registry.lookup("math").len(), 1);
    }

    #[test]
    fn latency_is_smoothed() {
        let (registry, tracker) = setup();
        tracker
            .record("math", Outcome::Success, Duration::from_millis(2000))
            .unwrap();
        let latency = registry.get("math").unwrap().average_latency;
        assert!((1199..=1200).contains(&latency.as_millis()));
    }

    #[test]
    fn skipped_does_not_move_health() {
        let (registry, tracker) = setup();
        let update = tracker
            .record("math", Outcome::Skipped, Duration::ZERO)
            .unwrap();
        assert!(update.is_none());
        assert_eq!(registry.get("math").unwrap().health_score, 0.5);
        assert_eq!(tracker.stats("math").unwrap().skipped, 1);
    }

    #[test]
    fn stats_track_success_rate() {
        let (_registry, tracker) = setup();
        tracker
            .record("math", Outcome::Success, Duration::from_millis(100))
            .unwrap();
        tracker
            .record("math", Outcome::Failure, Duration::from_millis(300))
            .unwrap();
        let stats = tracker.stats("math").unwrap();
        assert_eq!(stats.invocations, 2);
        assert!((stats.success_rate() - 0.5).abs() < 1e-12);
        assert!((stats.mean_latency_ms() - 200.0).abs() < 1e-9);
    }

    #[test]
    fn unknown_agent_rejected() {
        let (_registry, tracker) = setup();
        assert!(matches!(
            tracker.record("ghost", Outcome::Success, Duration::ZERO),
            Err(ConductorError::UnknownAgent(_))
        ));
    }

    #[test]
    fn config_validation() {
        assert!(TrackerConfig::default().validate().is_ok());
        let bad = TrackerConfig {
            alpha: 0.0,
            ..TrackerConfig::default()
        };
        assert!(bad.validate().is_err());
    }
}
