//! Agent trait: the execution interface the coordination core calls into
//!
//! Agents are external collaborators. The core only hands them a `TaskInput`
//! and a cancellation token and expects an `AgentOutput` or an `AgentError`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::context::SessionContext;

/// Errors an agent reports back to the core
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AgentError {
    /// Retryable by the agent itself; once its retry budget is spent the core
    /// treats it exactly like a permanent failure
    #[error("transient agent error: {0}")]
    Transient(String),

    #[error("permanent agent error: {0}")]
    Permanent(String),
}

impl AgentError {
    pub fn is_transient(&self) -> bool {
        matches!(self, AgentError::Transient(_))
    }
}

/// Everything an agent sees for one task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInput {
    pub task_id: Uuid,
    /// Original free-text request
    pub request: String,
    /// Payload of the previous pipeline stage, if any
    pub upstream: Option<Value>,
    /// Session context read before task creation
    pub context: SessionContext,
}

impl TaskInput {
    pub fn new(task_id: Uuid, request: &str, context: SessionContext) -> Self {
        Self {
            task_id,
            request: request.to_string(),
            upstream: None,
            context,
        }
    }

    pub fn with_upstream(mut self, upstream: Value) -> Self {
        self.upstream = Some(upstream);
        self
    }

    /// Request text with the upstream payload appended
    pub fn prompt(&self) -> String {
        match &self.upstream {
            Some(upstream) => format!("{}\n\nPrevious result:\n{}", self.request, upstream),
            None => self.request.clone(),
        }
    }
}

/// What an agent returns on success
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentOutput {
    pub payload: Value,
    /// Agent's own confidence in the payload, [0, 1]
    pub score: f64,
}

impl AgentOutput {
    pub fn new(payload: Value, score: f64) -> Self {
        Self { payload, score }
    }
}

/// A successful execution as seen by the aggregator and conflict resolver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResult {
    pub agent_id: String,
    pub payload: Value,
    pub score: f64,
    #[serde(with = "duration_ms")]
    pub latency: Duration,
}

/// Agent execution interface.
///
/// `execute` must watch `cancel` and return promptly once it fires; the core
/// marks the task Cancelled whether or not the agent acknowledges.
#[async_trait]
pub trait Agent: Send + Sync {
    fn id(&self) -> &str;

    async fn execute(
        &self,
        input: &TaskInput,
        cancel: CancellationToken,
    ) -> std::result::Result<AgentOutput, AgentError>;
}

pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn prompt_appends_upstream_payload() {
        let input = TaskInput::new(Uuid::new_v4(), "write a proposal", SessionContext::empty("s"))
            .with_upstream(json!({"findings": "three leads"}));
        let prompt = input.prompt();
        assert!(prompt.starts_with("write a proposal"));
        assert!(prompt.contains("three leads"));
    }

    #[test]
    fn agent_result_serializes_latency_as_millis() {
        let result = AgentResult {
            agent_id: "math".into(),
            payload: json!(42),
            score: 0.9,
            latency: Duration::from_millis(1500),
        };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["latency"], json!(1500));
    }
}
