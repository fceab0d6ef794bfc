//! Scripted agents for the `conductor run` command and local smoke tests.
//!
//! They sleep for their seeded latency and answer with a canned payload; no
//! network or model calls are made.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::traits::{Agent, AgentError, AgentOutput, TaskInput};
use crate::registry::AgentDescriptor;

#[derive(Debug, Clone, PartialEq)]
pub enum DemoResponse {
    /// Echo the prompt back with the agent id
    Echo,
    /// Numeric estimate derived from the prompt
    Estimate { base: f64 },
    /// Always fail
    Fail(String),
}

pub struct DemoAgent {
    id: String,
    delay: Duration,
    response: DemoResponse,
    score: f64,
}

impl DemoAgent {
    pub fn new(id: &str, delay: Duration, response: DemoResponse) -> Self {
        Self {
            id: id.to_string(),
            delay,
            response,
            score: 0.7,
        }
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = score;
        self
    }

    /// Pick a response from the descriptor's capabilities
    pub fn for_descriptor(descriptor: &AgentDescriptor) -> Self {
        let numeric = ["math", "finance", "rates", "pricing"]
            .iter()
            .any(|tag| descriptor.has_capability(tag));
        let response = if numeric {
            DemoResponse::Estimate { base: 100.0 }
        } else {
            DemoResponse::Echo
        };
        // Run demos faster than the seeded latency so they finish inside the timeout
        Self::new(&descriptor.id, descriptor.average_latency / 4, response)
    }
}

/// One demo agent per registered descriptor
pub fn demo_agents(descriptors: &[AgentDescriptor]) -> Vec<Arc<dyn Agent>> {
    descriptors
        .iter()
        .map(|d| Arc::new(DemoAgent::for_descriptor(d)) as Arc<dyn Agent>)
        .collect()
}

#[async_trait]
impl Agent for DemoAgent {
    fn id(&self) -> &str {
        &self.id
    }

    async fn execute(
        &self,
        input: &TaskInput,
        cancel: CancellationToken,
    ) -> Result<AgentOutput, AgentError> {
        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(AgentError::Transient("cancelled".to_string()));
            }
            _ = tokio::time::sleep(self.delay) => {}
        }

        match &self.response {
            DemoResponse::Echo => Ok(AgentOutput::new(
                json!({
                    "agent": self.id,
                    "answer": format!("{} handled: {}", self.id, input.prompt()),
                }),
                self.score,
            )),
            DemoResponse::Estimate { base } => {
                let words = input.request.split_whitespace().count() as f64;
                Ok(AgentOutput::new(
                    json!({ "value": base + words, "unit": "estimate" }),
                    self.score,
                ))
            }
            DemoResponse::Fail(reason) => Err(AgentError::Permanent(reason.clone())),
        }
    }
}
