//! Performance tracking: latency, outcomes and the health feedback loop

mod tracker;

pub use tracker::{ema, AgentStats, HealthUpdate, Outcome, PerformanceTracker, TrackerConfig};
