pub mod agents;
pub mod classifier;
pub mod cli;
pub mod config;
pub mod conflict;
pub mod coordinator;
pub mod error;
pub mod model;
pub mod performance;
pub mod registry;
pub mod strategy;

pub use agents::{
    Agent, AgentError, AgentOutput, AgentResult, ContextEntry, ContextStore, InMemoryContextStore,
    SessionContext, TaskInput,
};
pub use classifier::{
    Classifier, ClassifierConfig, IntentRule, LanguageModel, RoutingDecision, StrategyKind,
    TargetRelation,
};
pub use config::{AgentSpec, AppConfig};
pub use conflict::{ConflictResolver, Resolution, ResolverConfig, UnresolvedConflict};
pub use coordinator::{
    Coordinator, CoordinatorBuilder, CoordinatorConfig, CoordinatorResult, MetricsSnapshot, Task,
    TaskStatus,
};
pub use error::{ConductorError, Result};
pub use model::{CliRoutingModel, ModelClientConfig};
pub use performance::{AgentStats, Outcome, PerformanceTracker, TrackerConfig};
pub use registry::{AgentDescriptor, AgentRegistry};
