//! Routing model backed by an LLM command-line tool
//!
//! Spawns `<cli_path> --print --output-format text`, writes the routing
//! prompt to stdin and parses the JSON proposal out of stdout.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::classifier::{parse_proposal, LanguageModel, ModelError, ModelProposal, RoutingPrompt};

const DEFAULT_ROUTING_SYSTEM_PROMPT: &str = "You are the routing layer of a multi-agent assistant. \
You never answer the user's request yourself; you only choose which agents should handle it \
and reply with a single JSON object.";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelClientConfig {
    /// Path to the CLI executable
    pub cli_path: String,
    pub timeout_secs: u64,
    /// Attempts on `Unavailable`; malformed output is not retried
    pub max_retries: u8,
    pub model: Option<String>,
    pub system_prompt: Option<String>,
}

impl Default for ModelClientConfig {
    fn default() -> Self {
        Self {
            cli_path: "claude".to_string(),
            timeout_secs: 30,
            max_retries: 2,
            model: None,
            system_prompt: Some(DEFAULT_ROUTING_SYSTEM_PROMPT.to_string()),
        }
    }
}

pub struct CliRoutingModel {
    config: ModelClientConfig,
}

impl CliRoutingModel {
    pub fn new(config: ModelClientConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ModelClientConfig {
        &self.config
    }

    async fn query_once(&self, prompt: &str) -> Result<String, ModelError> {
        let mut cmd = Command::new(&self.config.cli_path);
        cmd.arg("--print")
            .arg("--output-format")
            .arg("text")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(ref model) = self.config.model {
            cmd.arg("--model").arg(model);
        }
        if let Some(ref system_prompt) = self.config.system_prompt {
            cmd.arg("--system-prompt").arg(system_prompt);
        }

        debug!(cli = %self.config.cli_path, "Spawning routing model process");
        let mut child = cmd.spawn().map_err(|e| {
            ModelError::Unavailable(format!(
                "failed to spawn {}: {}",
                self.config.cli_path, e
            ))
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(prompt.as_bytes())
                .await
                .map_err(|e| ModelError::Unavailable(format!("failed to write prompt: {}", e)))?;
        }

        let output = timeout(
            Duration::from_secs(self.config.timeout_secs),
            child.wait_with_output(),
        )
        .await
        .map_err(|_| {
            ModelError::Unavailable(format!(
                "routing model timed out after {}s",
                self.config.timeout_secs
            ))
        })?
        .map_err(|e| ModelError::Unavailable(format!("failed to read output: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ModelError::Unavailable(format!(
                "routing model exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout).to_string();
        debug!(bytes = text.len(), "Raw routing model response");
        Ok(text)
    }
}

#[async_trait]
impl LanguageModel for CliRoutingModel {
    async fn classify(&self, prompt: &RoutingPrompt) -> Result<ModelProposal, ModelError> {
        let rendered = prompt.render();
        let attempts = self.config.max_retries.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            match self.query_once(&rendered).await {
                Ok(text) => return parse_proposal(&text),
                Err(e) => {
                    warn!(attempt, error = %e, "Routing model query failed");
                    last_error = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(Duration::from_millis(500)).await;
                    }
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| ModelError::Unavailable("routing model query failed".to_string())))
    }
}
