use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::classifier::ClassifierConfig;
use crate::conflict::ResolverConfig;
use crate::coordinator::CoordinatorConfig;
use crate::error::{ConductorError, Result};
use crate::model::ModelClientConfig;
use crate::performance::TrackerConfig;
use crate::registry::AgentDescriptor;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    /// Agents to register at startup
    #[serde(default)]
    pub agents: Vec<AgentSpec>,
    /// Routing model; keyword routing only when absent
    #[serde(default)]
    pub model: Option<ModelClientConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
    /// Directory for the daily rolling log file
    #[serde(default)]
    pub dir: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            dir: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// One `[[agents]]` entry
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSpec {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub capabilities: Vec<String>,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default)]
    pub initial_health: Option<f64>,
    #[serde(default = "default_average_latency_ms")]
    pub average_latency_ms: u64,
    /// Overrides the derived per-task timeout
    #[serde(default)]
    pub task_timeout_ms: Option<u64>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_max_concurrency() -> usize {
    1
}

fn default_average_latency_ms() -> u64 {
    2000
}

fn default_enabled() -> bool {
    true
}

impl AgentSpec {
    pub fn descriptor(&self) -> AgentDescriptor {
        let mut descriptor = AgentDescriptor::new(&self.id, self.capabilities.iter())
            .with_max_concurrency(self.max_concurrency)
            .with_average_latency(Duration::from_millis(self.average_latency_ms));
        if let Some(name) = &self.name {
            descriptor = descriptor.with_name(name);
        }
        if let Some(health) = self.initial_health {
            descriptor = descriptor.with_initial_health(health);
        }
        if let Some(ms) = self.task_timeout_ms {
            descriptor = descriptor.with_task_timeout(Duration::from_millis(ms));
        }
        descriptor.enabled = self.enabled;
        descriptor
    }
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> std::result::Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> std::result::Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Environment-specific overrides (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("CONDUCTOR_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // CONDUCTOR_COORDINATOR__SAFETY_FACTOR, CONDUCTOR_LOGGING__LEVEL, ...
            .add_source(
                Environment::with_prefix("CONDUCTOR")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Validate every section plus the agent list
    pub fn validate(&self) -> Result<()> {
        self.coordinator.validate()?;
        self.classifier.validate()?;
        self.resolver.validate()?;
        self.tracker.validate()?;

        let mut errors = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for spec in &self.agents {
            if spec.id.trim().is_empty() {
                errors.push("agent id must not be empty".to_string());
            } else if !seen.insert(spec.id.as_str()) {
                errors.push(format!("agent {} is listed twice", spec.id));
            }
            if spec.capabilities.is_empty() {
                errors.push(format!("agent {} has no capabilities", spec.id));
            }
            if spec.max_concurrency == 0 {
                errors.push(format!("agent {} max_concurrency must be at least 1", spec.id));
            }
            if let Some(h) = spec.initial_health {
                if !(0.0..=1.0).contains(&h) {
                    errors.push(format!("agent {} initial_health must be in [0, 1]", spec.id));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConductorError::Validation(errors.join("; ")))
        }
    }
}
