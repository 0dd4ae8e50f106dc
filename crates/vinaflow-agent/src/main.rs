//! vinaflow - batch AutoDock Vina docking
//! Entry point for the command-line binary.

mod config;
mod repository;
mod status;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use vinaflow_docking::convert::ObabelConverter;
use vinaflow_docking::docking::VinaRunner;
use vinaflow_docking::report::JsonReportSink;
use vinaflow_docking::{BatchOrchestrator, BatchOutcome, BatchProgress, BatchRequest, Capabilities};

use crate::config::Config;
use crate::repository::LocalRepository;

#[derive(Parser)]
#[command(name = "vinaflow", version, about = "Dock a set of ligands against one receptor")]
struct Cli {
    /// Path to vinaflow.toml (defaults to $VINAFLOW_CONFIG, then ./vinaflow.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one docking batch described by a JSON request file
    Run {
        #[arg(long)]
        request: PathBuf,
    },
    /// Report the version and whether obabel and vina can be launched
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("vinaflow=debug,info")),
        )
        .init();

    let cli = Cli::parse();
    info!("vinaflow {}", env!("CARGO_PKG_VERSION"));

    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Command::Check => check(&config).await,
        Command::Run { request } => run(&config, &request).await,
    }
}

async fn check(config: &Config) -> anyhow::Result<()> {
    let status = status::tool_status(&config.tools).await;
    for tool in &status.tools {
        match &tool.version {
            Some(v) => info!(tool = tool.name, path = %tool.path, "available: {v}"),
            None => warn!(tool = tool.name, path = %tool.path, "not available"),
        }
    }
    println!("{}", serde_json::to_string_pretty(&status)?);
    if !status.ready() {
        anyhow::bail!("one or more external tools are unavailable");
    }
    Ok(())
}

fn build_capabilities(config: &Config) -> anyhow::Result<Capabilities> {
    let repo = &config.repository;
    let repository = LocalRepository::open(&repo.store_dir, repo.manifest_path())?;
    info!("Local object store ready: {} objects", repository.len());

    let tools = &config.tools;
    let converter = ObabelConverter::new(&tools.obabel_path, tools.converter_timeout())
        .with_receptor_flags(tools.receptor_flags.clone())
        .with_ligand_flags(tools.ligand_flags.clone());
    let engine = VinaRunner::new(&tools.vina_path, tools.engine_timeout());

    Ok(Capabilities {
        repository: Arc::new(repository),
        converter: Arc::new(converter),
        engine: Arc::new(engine),
        report: Arc::new(JsonReportSink::new(config.report.name_prefix.clone())),
        uploader: None,
    })
}

async fn run(config: &Config, request_path: &Path) -> anyhow::Result<()> {
    let text = tokio::fs::read_to_string(request_path)
        .await
        .with_context(|| format!("cannot read request file {}", request_path.display()))?;
    let request: BatchRequest = serde_json::from_str(&text)
        .with_context(|| format!("invalid request file {}", request_path.display()))?;

    let caps = build_capabilities(config)?;
    let (progress_tx, mut progress_rx) = broadcast::channel::<BatchProgress>(64);
    tokio::spawn(async move {
        while let Ok(event) = progress_rx.recv().await {
            info!(batch_id = %event.batch_id, stage = %event.stage, "{}", event.message);
        }
    });

    let mut orchestrator =
        BatchOrchestrator::new(caps, config.batch_settings()).with_progress(progress_tx);
    let outcome = orchestrator.run_batch(request).await?;

    print_summary(&outcome);
    Ok(())
}

fn print_summary(outcome: &BatchOutcome) {
    let payload = &outcome.payload;
    println!("Receptor: {} ({})", payload.receptor.name, payload.receptor.upa);
    println!("{:<40} {:<16} {:>10}", "Ligand", "Reference", "Affinity");
    for r in &payload.results {
        println!("{:<40} {:<16} {:>10.1}", r.ligand_name, r.ligand_ref.to_string(), r.affinity);
    }
    if let Some(best) = &payload.best {
        println!("Best: {} ({:.1} kcal/mol)", best.ligand_name, best.affinity);
    }
    println!("Report: {} -> {}", outcome.report.name, outcome.report.reference);
}
