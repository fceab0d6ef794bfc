//! Task Coordinator
//!
//! Turns a routing decision into tasks, runs the matching execution strategy
//! under an overall timeout, aggregates the outcome and keeps task history
//! and request metrics.

pub mod aggregator;
pub mod config;
pub mod coordinator;
pub mod state;
pub mod task;

pub use aggregator::{aggregate, Aggregate, AgentTaskReport, CoordinatorResult};
pub use config::CoordinatorConfig;
pub use coordinator::{Coordinator, CoordinatorBuilder};
pub use state::{CoordinationMetrics, MetricsSnapshot, RequestOutcome, TaskLedger};
pub use task::{PlannedTask, SweptTask, Task, TaskBoard, TaskStatus};
