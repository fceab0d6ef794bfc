//! Coordinator Configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{ConductorError, Result};
use crate::strategy::TaskTimeouts;

/// Upper bound for `safety_factor` and `default_task_timeout_multiplier`
pub const MAX_TIMEOUT_FACTOR: f64 = 100.0;

/// Ceiling for any derived timeout
pub const MAX_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// `base * factor`, saturating at `MAX_TIMEOUT`
pub(crate) fn scale_timeout(base: Duration, factor: f64) -> Duration {
    Duration::try_from_secs_f64(base.as_secs_f64() * factor)
        .map_or(MAX_TIMEOUT, |scaled| scaled.min(MAX_TIMEOUT))
}

/// Configuration for the coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Overall timeout = estimated duration * safety factor
    pub safety_factor: f64,
    /// Per-task timeout = average latency * multiplier (unless the agent sets one)
    pub default_task_timeout_multiplier: f64,
    /// Floor for both the per-task and the overall timeout (ms)
    pub min_task_timeout_ms: u64,
    /// Finished tasks kept for `task_status` lookups
    pub history_limit: usize,
    /// Append an interaction entry to the session context after each request
    pub record_interactions: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            safety_factor: 2.0,
            default_task_timeout_multiplier: 3.0,
            min_task_timeout_ms: 100,
            history_limit: 1000,
            record_interactions: true,
        }
    }
}

impl CoordinatorConfig {
    pub fn validate(&self) -> Result<()> {
        if !(1.0..=MAX_TIMEOUT_FACTOR).contains(&self.safety_factor) {
            return Err(ConductorError::Validation(format!(
                "coordinator.safety_factor must be in [1, {}], got {}",
                MAX_TIMEOUT_FACTOR, self.safety_factor
            )));
        }
        if !(self.default_task_timeout_multiplier > 0.0
            && self.default_task_timeout_multiplier <= MAX_TIMEOUT_FACTOR)
        {
            return Err(ConductorError::Validation(format!(
                "coordinator.default_task_timeout_multiplier must be in (0, {}], got {}",
                MAX_TIMEOUT_FACTOR, self.default_task_timeout_multiplier
            )));
        }
        Ok(())
    }

    pub fn min_task_timeout(&self) -> Duration {
        Duration::from_millis(self.min_task_timeout_ms)
    }

    pub fn task_timeouts(&self) -> TaskTimeouts {
        TaskTimeouts {
            multiplier: self.default_task_timeout_multiplier,
            floor: self.min_task_timeout(),
        }
    }

    /// `estimated * safety_factor`, never below the floor or above `MAX_TIMEOUT`
    pub fn overall_timeout(&self, estimated: Duration) -> Duration {
        scale_timeout(estimated, self.safety_factor).max(self.min_task_timeout())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overall_timeout_applies_safety_factor_and_floor() {
        let config = CoordinatorConfig::default();
        assert_eq!(
            config.overall_timeout(Duration::from_secs(2)),
            Duration::from_secs(4)
        );
        assert_eq!(
            config.overall_timeout(Duration::ZERO),
            Duration::from_millis(100)
        );
    }

    #[test]
    fn rejects_safety_factor_below_one() {
        let config = CoordinatorConfig {
            safety_factor: 0.5,
            ..CoordinatorConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_unbounded_factors() {
        for safety_factor in [1e300, f64::INFINITY, f64::NAN] {
            let config = CoordinatorConfig {
                safety_factor,
                ..CoordinatorConfig::default()
            };
            assert!(config.validate().is_err(), "accepted {safety_factor}");
        }
        let config = CoordinatorConfig {
            default_task_timeout_multiplier: 1e12,
            ..CoordinatorConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(CoordinatorConfig::default().validate().is_ok());
    }

    #[test]
    fn oversized_timeouts_saturate() {
        // unvalidated configs must not panic either
        let config = CoordinatorConfig {
            safety_factor: 1e300,
            ..CoordinatorConfig::default()
        };
        assert_eq!(config.overall_timeout(Duration::from_secs(2)), MAX_TIMEOUT);
        assert_eq!(scale_timeout(Duration::MAX, 2.0), MAX_TIMEOUT);
        assert_eq!(scale_timeout(Duration::from_secs(3), f64::NAN), MAX_TIMEOUT);
        assert_eq!(
            scale_timeout(Duration::from_millis(500), 3.0),
            Duration::from_millis(1500)
        );
    }
}
