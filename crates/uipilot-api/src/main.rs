//! uipilot CLI entry point.
//!
//! Binary name: `uipilot`
//!
//! Parses CLI arguments, loads the workflow document and engine
//! configuration, then validates or executes the workflow. Execution runs
//! against the built-in dry-run driver; a real browser binding is wired in
//! by embedding `uipilot-core` as a library.

mod output;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use console::style;
use tracing_subscriber::EnvFilter;

use uipilot_core::engine::definition::load_workflow_file;
use uipilot_core::{DryRunDriver, WorkflowEngine};
use uipilot_types::config::EngineConfig;

#[derive(Parser)]
#[command(name = "uipilot", version, about = "DSL-driven UI workflow runner")]
struct Cli {
    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log errors.
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Emit machine-readable JSON instead of styled output.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse and structurally validate a workflow file.
    Validate {
        /// Path to the workflow YAML file.
        file: PathBuf,
    },

    /// Execute a workflow file against the built-in dry-run driver.
    Run {
        /// Path to the workflow YAML file.
        file: PathBuf,

        /// Engine configuration TOML; defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Template values as inline JSON, layered under the workflow's
        /// `${...}` placeholders (e.g. '{"config":{"base_url":"https://x"}}').
        #[arg(long)]
        values: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up tracing based on verbosity
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info,uipilot=debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();

    match cli.command {
        Commands::Validate { file } => {
            let workflow = load_workflow_file(&file)
                .with_context(|| format!("failed to load {}", file.display()))?;
            let steps: usize = workflow.phases.iter().map(|p| p.steps.len()).sum();
            if cli.json {
                let summary = serde_json::json!({
                    "name": workflow.name,
                    "phases": workflow.phases.len(),
                    "steps": steps,
                    "valid": true,
                });
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!(
                    "{} {} ({} phases, {} steps)",
                    style("valid").green().bold(),
                    workflow.name,
                    workflow.phases.len(),
                    steps,
                );
            }
        }

        Commands::Run {
            file,
            config,
            values,
        } => {
            let workflow = load_workflow_file(&file)
                .with_context(|| format!("failed to load {}", file.display()))?;
            let engine_config = load_engine_config(config.as_deref())?;

            let mut engine = WorkflowEngine::new(Arc::new(DryRunDriver::new()), engine_config);
            if let Some(values) = values {
                let layer: serde_json::Value =
                    serde_json::from_str(&values).context("--values must be valid JSON")?;
                engine.add_template_layer(layer);
            }

            let result = engine.execute_workflow(&workflow).await;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                output::render_result(&result);
            }

            if !result.overall_success {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn load_engine_config(path: Option<&std::path::Path>) -> Result<EngineConfig> {
    match path {
        None => Ok(EngineConfig::default()),
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            toml::from_str(&content)
                .with_context(|| format!("invalid engine configuration in {}", path.display()))
        }
    }
}
