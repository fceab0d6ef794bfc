//! Agents: the execution and memory collaborators the core talks to
//!
//! The core never looks inside an agent. It calls `Agent::execute` with a
//! cancellation token and reads/writes session memory through `ContextStore`.

pub mod context;
pub mod demo;
pub mod traits;

#[cfg(test)]
pub use context::MockContextStore;
pub use context::{
    ContextEntry, ContextStore, ContextStoreError, InMemoryContextStore, SessionContext,
};
pub use demo::{demo_agents, DemoAgent, DemoResponse};
pub use traits::{Agent, AgentError, AgentOutput, AgentResult, TaskInput};
