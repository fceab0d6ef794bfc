use clap::{Parser, Subcommand};
use serde::Serialize;
use tabled::{Table, Tabled};

use crate::performance::AgentStats;
use crate::registry::AgentDescriptor;

#[derive(Parser)]
#[command(name = "conductor")]
#[command(author = "Conductor Team")]
#[command(version = "0.1.0")]
#[command(about = "Route requests to specialist agents and coordinate their results", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Directory holding default.toml and environment overrides
    #[arg(long, default_value = "config", env = "CONDUCTOR_CONFIG_DIR")]
    pub config_dir: String,

    /// Print JSON instead of tables
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show registered agents and their health
    Agents,
    /// Show the routing decision for a request without executing it
    Classify {
        /// Request text
        text: String,
        /// Session whose context is passed to the classifier
        #[arg(short, long, default_value = "cli")]
        session: String,
    },
    /// Submit a request against the demo agents
    Run {
        /// Request text
        text: String,
        #[arg(short, long, default_value = "cli")]
        session: String,
        /// Print per-agent statistics after the request
        #[arg(long)]
        stats: bool,
    },
}

/// Output mode for command results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Table,
    Json,
}

impl OutputMode {
    pub fn from_json_flag(json: bool) -> Self {
        if json {
            OutputMode::Json
        } else {
            OutputMode::Table
        }
    }
}

#[derive(Debug, Serialize, Tabled)]
pub struct AgentRow {
    pub id: String,
    pub capabilities: String,
    pub health: String,
    pub latency_ms: u128,
    pub slots: usize,
    pub state: String,
}

impl From<&AgentDescriptor> for AgentRow {
    fn from(agent: &AgentDescriptor) -> Self {
        let state = if !agent.enabled {
            "disabled"
        } else if agent.excluded {
            "excluded"
        } else {
            "routable"
        };
        Self {
            id: agent.id.clone(),
            capabilities: agent
                .capabilities
                .iter()
                .cloned()
                .collect::<Vec<_>>()
                .join(","),
            health: format!("{:.3}", agent.health_score),
            latency_ms: agent.average_latency.as_millis(),
            slots: agent.max_concurrency,
            state: state.to_string(),
        }
    }
}

#[derive(Debug, Serialize, Tabled)]
pub struct StatsRow {
    pub agent: String,
    pub invocations: u64,
    pub successes: u64,
    pub failures: u64,
    pub skipped: u64,
    pub success_rate: String,
    pub mean_latency_ms: String,
}

impl From<&AgentStats> for StatsRow {
    fn from(stats: &AgentStats) -> Self {
        Self {
            agent: stats.agent_id.clone(),
            invocations: stats.invocations,
            successes: stats.successes,
            failures: stats.failures,
            skipped: stats.skipped,
            success_rate: format!("{:.0}%", stats.success_rate() * 100.0),
            mean_latency_ms: format!("{:.0}", stats.mean_latency_ms()),
        }
    }
}

/// Print a vec of Tabled + Serialize items in the chosen mode.
pub fn print_items<T: Tabled + Serialize>(items: &[T], mode: OutputMode) -> anyhow::Result<()> {
    match mode {
        OutputMode::Table => {
            if items.is_empty() {
                println!("(no results)");
            } else {
                println!("{}", Table::new(items));
            }
        }
        OutputMode::Json => println!("{}", serde_json::to_string_pretty(items)?),
    }
    Ok(())
}

/// Single items are always printed as JSON
pub fn print_item<T: Serialize>(item: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(item)?);
    Ok(())
}
