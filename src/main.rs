//! studyferry binary
//!
//! `studyferry run` executes the coupling pass followed by the transfer
//! pass, which is what the nightly job wants. The passes are also exposed
//! individually for operating on half of the pipeline.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use studyferry::config::{Config, LoggingConfig};
use studyferry::coupling;
use studyferry::registry::RegistryClient;
use studyferry::scan;
use studyferry::transfer::{DimseSession, TransferReport, TransferRunner};

#[derive(Parser)]
#[command(name = "studyferry", version, about = "Couple exported imaging studies to a subject registry and ship them to a DICOM archive")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "STUDYFERRY_CONFIG", default_value = "studyferry.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Scan the export folder and write + upload the coupling list
    Couple {
        /// Write the coupling list but do not upload it
        #[arg(long)]
        no_upload: bool,
    },
    /// Send unfinished study folders to the archive
    Send,
    /// Couple, then send (the default)
    Run,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(&cli.config)
        .with_context(|| format!("loading configuration {}", cli.config.display()))?;
    init_tracing(&config.logging);

    info!(
        "Starting studyferry v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    match cli.command.unwrap_or(Command::Run) {
        Command::Couple { no_upload } => {
            run_couple(&config, !no_upload).await?;
        }
        Command::Send => {
            run_send(&config).await?;
        }
        Command::Run => {
            run_couple(&config, true).await?;
            run_send(&config).await?;
        }
    }
    Ok(())
}

/// Scan, reconcile with the registry, and produce the coupling list.
async fn run_couple(config: &Config, upload: bool) -> Result<()> {
    let client = RegistryClient::new(&config.registry)?;
    let mut projects = config.compile_projects()?;
    for project in &mut projects {
        client
            .load_project_state(project)
            .await
            .with_context(|| format!("loading registry state for project {:?}", project.name))?;
    }

    let scan = scan::scan_study_folder(&config.root_folder)?;
    let rows = coupling::build_couplings(&client, &mut projects, &scan.studies)
        .await
        .context("coupling pass failed")?;
    coupling::write_coupling_file(&rows, &config.coupling_file)?;
    if upload {
        client.upload_coupling(&config.coupling_file).await?;
    }
    Ok(())
}

/// Ship unfinished study folders to the archive.
async fn run_send(config: &Config) -> Result<TransferReport> {
    let archive = config.archive.clone();
    let root = config.root_folder.clone();
    // the upper-layer association is synchronous, keep it off the runtime
    let report = tokio::task::spawn_blocking(move || -> studyferry::Result<TransferReport> {
        let session = DimseSession::establish(&archive)?;
        TransferRunner::new(session).send_tree(&root)
    })
    .await
    .context("transfer task panicked")??;
    Ok(report)
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
