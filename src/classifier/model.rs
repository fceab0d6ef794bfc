//! Language-model routing capability
//!
//! The model is an opaque collaborator: it receives a routing prompt and
//! returns a proposal or a typed error. Proposals are validated against the
//! registry before the classifier trusts them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use thiserror::Error;

use super::decision::TargetRelation;
use super::lexicon::TagScore;
use crate::agents::SessionContext;
use crate::registry::AgentRegistry;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("model unavailable: {0}")]
    Unavailable(String),

    #[error("malformed model output: {0}")]
    MalformedOutput(String),
}

/// An agent the model may pick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateAgent {
    pub id: String,
    pub capabilities: BTreeSet<String>,
    pub health_score: f64,
}

/// Everything the model sees for one request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingPrompt {
    pub request: String,
    pub context: SessionContext,
    pub candidates: Vec<CandidateAgent>,
    pub intents: Vec<TagScore>,
}

impl RoutingPrompt {
    /// Plain-text prompt with the structured-output contract
    pub fn render(&self) -> String {
        let mut agents = String::new();
        for c in &self.candidates {
            let caps: Vec<&str> = c.capabilities.iter().map(String::as_str).collect();
            agents.push_str(&format!(
                "- {} (capabilities: {}; health {:.2})\n",
                c.id,
                caps.join(", "),
                c.health_score
            ));
        }

        let mut history = String::new();
        for entry in self.context.recent(5) {
            history.push_str(&format!("- [{}] {}\n", entry.kind, entry.data));
        }
        if history.is_empty() {
            history.push_str("- (none)\n");
        }

        let intents: Vec<String> = self
            .intents
            .iter()
            .map(|t| format!("{} ({:.2})", t.tag, t.score))
            .collect();

        format!(
            r#"## Available Agents

{agents}
## Recent Session Context

{history}
## Keyword Intents

{intents}

## Request

{request}

## Instructions

Pick the agent(s) that should handle the request. Respond ONLY with valid JSON:
{{
    "target_agents": ["agent_id", ...],
    "confidence": 0.0 to 1.0,
    "reasoning": "why these agents",
    "priority": 1 to 10,
    "relation": "independent" | "chained" | "same_question"
}}
List chained agents in execution order."#,
            agents = agents,
            history = history,
            intents = if intents.is_empty() {
                "(none)".to_string()
            } else {
                intents.join(", ")
            },
            request = self.request,
        )
    }
}

/// Structured output requested from the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelProposal {
    pub target_agents: Vec<String>,
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub priority: Option<i64>,
    #[serde(default)]
    pub relation: Option<TargetRelation>,
}

impl ModelProposal {
    /// Check the proposal against the registry.
    ///
    /// Drops duplicate ids (first occurrence wins) and rejects empty lists,
    /// non-finite confidence, and unknown or unroutable agents.
    pub fn validate(mut self, registry: &AgentRegistry) -> Result<Self, ModelError> {
        let mut seen = HashSet::new();
        self.target_agents.retain(|id| seen.insert(id.clone()));

        if self.target_agents.is_empty() {
            return Err(ModelError::MalformedOutput(
                "no target agents proposed".to_string(),
            ));
        }
        if !self.confidence.is_finite() {
            return Err(ModelError::MalformedOutput(format!(
                "confidence is not a number: {}",
                self.confidence
            )));
        }
        for id in &self.target_agents {
            if !registry.contains(id) {
                return Err(ModelError::MalformedOutput(format!(
                    "unknown agent proposed: {}",
                    id
                )));
            }
            if !registry.is_routable(id) {
                return Err(ModelError::MalformedOutput(format!(
                    "agent not routable: {}",
                    id
                )));
            }
        }
        self.confidence = self.confidence.clamp(0.0, 1.0);
        Ok(self)
    }
}

/// Routing capability backed by a language model
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn classify(&self, prompt: &RoutingPrompt) -> Result<ModelProposal, ModelError>;
}

/// Extract JSON from a model reply (fenced block or raw object)
pub fn extract_json(text: &str) -> &str {
    if let Some(start) = text.find("```json") {
        if let Some(end) = text[start + 7..].find("```") {
            return text[start + 7..start + 7 + end].trim();
        }
    }

    if let Some(start) = text.find("```") {
        if let Some(end) = text[start + 3..].find("```") {
            let content = text[start + 3..start + 3 + end].trim();
            // Skip language identifier if present
            if !content.starts_with('{') {
                if let Some(newline) = content.find('\n') {
                    return content[newline + 1..].trim();
                }
            }
            return content;
        }
    }

    if let Some(start) = text.find('{') {
        if let Some(end) = text.rfind('}') {
            if end > start {
                return &text[start..=end];
            }
        }
    }

    text.trim()
}

/// Parse a raw model reply into a proposal
pub fn parse_proposal(text: &str) -> Result<ModelProposal, ModelError> {
    let json = extract_json(text);
    serde_json::from_str(json).map_err(|e| ModelError::MalformedOutput(e.to_string()))
}
