use anyhow::Context;
use clap::Parser;
use conductor::agents::demo_agents;
use conductor::cli::{print_item, print_items, AgentRow, Cli, Commands, OutputMode, StatsRow};
use conductor::config::{AgentSpec, AppConfig};
use conductor::error::{ConductorError, Result};
use conductor::{Coordinator, CoordinatorBuilder};
use tracing::{error, info};

mod main_runtime;

use main_runtime::{init_logging, init_logging_simple};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mode = OutputMode::from_json_flag(cli.json);

    let config = AppConfig::load_from(&cli.config_dir)
        .with_context(|| format!("loading configuration from {}", cli.config_dir))?;
    match &cli.command {
        Commands::Run { .. } => init_logging(&config.logging),
        _ => init_logging_simple(),
    }
    config.validate().context("invalid configuration")?;

    let coordinator = match build_coordinator(&config) {
        Ok(coordinator) => coordinator,
        Err(e) => {
            error!(error = %e, "Failed to build coordinator");
            return Err(e.into());
        }
    };

    match cli.command {
        Commands::Agents => {
            let rows: Vec<AgentRow> = coordinator
                .registry()
                .snapshot()
                .iter()
                .map(AgentRow::from)
                .collect();
            print_items(&rows, mode)?;
        }
        Commands::Classify { text, session } => {
            let context = conductor::SessionContext::empty(&session);
            let decision = coordinator.classifier().classify(&text, &context).await;
            print_item(&decision)?;
        }
        Commands::Run {
            text,
            session,
            stats,
        } => {
            info!(session = %session, "Submitting request");
            let result = coordinator
                .submit(&text, &session)
                .await
                .context("request failed")?;
            print_item(&result)?;
            if stats {
                let rows: Vec<StatsRow> = coordinator
                    .tracker()
                    .all_stats()
                    .iter()
                    .map(StatsRow::from)
                    .collect();
                print_items(&rows, mode)?;
            }
        }
    }

    Ok(())
}

/// Configured agents backed by demo executors
fn build_coordinator(config: &AppConfig) -> Result<Coordinator> {
    if config.agents.is_empty() {
        return Err(ConductorError::Validation(
            "no agents configured; add [[agents]] entries to the config".to_string(),
        ));
    }
    let descriptors: Vec<_> = config.agents.iter().map(AgentSpec::descriptor).collect();
    CoordinatorBuilder::from_config(config)
        .agents(demo_agents(&descriptors))
        .build()
}
