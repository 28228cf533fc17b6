//! sfg-pipeline - command-line entry point
//!
//! Registers campaign files in the catalog and runs the processing stages for
//! one (network, station, campaign) scope.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;

use sfg_common::config::{
    default_config_path, load_toml_config, resolve_root_folder, TomlConfig, ROOT_FOLDER_ENV,
};
use sfg_common::LogContext;
use sfg_pipeline::config::PipelineConfig;
use sfg_pipeline::models::{DirectoryLayout, Scope};
use sfg_pipeline::services::stages::stage_names;
use sfg_pipeline::open_orchestrator;

/// Command-line arguments for sfg-pipeline
#[derive(Parser, Debug)]
#[command(name = "sfg-pipeline")]
#[command(about = "Seafloor geodesy campaign processing pipeline")]
#[command(version)]
struct Cli {
    /// Root folder holding the catalog and campaign directories
    #[arg(short, long, global = true)]
    root_folder: Option<PathBuf>,

    /// Configuration file (defaults to the platform config location)
    #[arg(short, long, global = true, env = "SFG_CONFIG")]
    config: Option<PathBuf>,

    /// Log filter directive, e.g. "debug" or "sfg_pipeline=trace"
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct ScopeArgs {
    #[arg(long)]
    network: String,
    #[arg(long)]
    station: String,
    #[arg(long)]
    campaign: String,
}

impl ScopeArgs {
    fn scope(&self) -> Scope {
        Scope::new(&self.network, &self.station, &self.campaign)
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Classify the files under a directory and register them
    Ingest {
        dir: PathBuf,
        #[command(flatten)]
        scope: ScopeArgs,
    },
    /// Run every stage, or a single named stage
    Run {
        #[command(flatten)]
        scope: ScopeArgs,
        /// Only run this stage
        #[arg(long)]
        stage: Option<String>,
        /// Re-run regardless of catalog state
        #[arg(long = "override")]
        override_existing: bool,
    },
    /// Print asset counts per scope
    Status {
        #[arg(long)]
        network: Option<String>,
    },
    /// List stage names in execution order
    Stages,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Command::Stages = cli.command {
        for name in stage_names() {
            println!("{}", name);
        }
        return Ok(());
    }

    let config_path = cli.config.clone().or_else(default_config_path);
    let toml_config = match &config_path {
        Some(path) if path.exists() => load_toml_config(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        _ => TomlConfig::default(),
    };

    let log = LogContext::init(&toml_config.logging).context("Failed to initialize logging")?;
    if let Some(level) = &cli.log_level {
        log.set_level(level)?;
    }

    let mut pipeline_config = match &config_path {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    if let Command::Run {
        stage,
        override_existing: true,
        ..
    } = &cli.command
    {
        match stage {
            Some(name) => {
                pipeline_config.override_stages.insert(name.clone());
            }
            None => pipeline_config.override_all = true,
        }
    }

    let root = resolve_root_folder(cli.root_folder.as_deref(), ROOT_FOLDER_ENV, Some(&toml_config));
    info!(root = %root.display(), "Starting sfg-pipeline");

    let orchestrator = open_orchestrator(
        DirectoryLayout::new(&root),
        toml_config.catalog_context,
        pipeline_config,
    )
    .await
    .context("Failed to open catalog")?
    .with_log_context(log);

    match cli.command {
        Command::Ingest { dir, scope } => {
            let result = orchestrator.ingest_directory(&dir, &scope.scope()).await?;
            for (asset_type, count) in result.counts_by_type() {
                println!("{:>14}  {}", asset_type.as_str(), count);
            }
            println!(
                "{} classified, {} unclassified, {} empty",
                result.assets.len(),
                result.unclassified.len(),
                result.empty.len()
            );
        }
        Command::Run { scope, stage, .. } => {
            let scope = scope.scope();
            match stage {
                Some(name) => {
                    let stats = orchestrator.run_stage(&scope, &name, true).await?;
                    println!("{}: {}", name, stats.display_string());
                    if stats.failed > 0 {
                        bail!("{} unit(s) of {} failed", stats.failed, name);
                    }
                }
                None => {
                    let statistics = orchestrator.run_pipeline(&scope).await?;
                    for line in statistics.display_lines() {
                        println!("{}", line);
                    }
                    if statistics.total_failed() > 0 {
                        bail!("{} unit(s) failed", statistics.total_failed());
                    }
                }
            }
        }
        Command::Status { network } => {
            let scopes = orchestrator.catalog().get_parent_stations(network.as_deref()).await;
            if scopes.is_empty() {
                println!("No assets catalogued");
            }
            for scope in scopes {
                println!("{}", scope);
                for (asset_type, count) in orchestrator.catalog().get_dtype_counts(&scope).await {
                    println!("  {:>14}  {}", asset_type.as_str(), count);
                }
            }
        }
        Command::Stages => {}
    }

    Ok(())
}
