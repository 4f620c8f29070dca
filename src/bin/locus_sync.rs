use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use locus_sync::config::SyncConfig;
use locus_sync::integrity;
use locus_sync::pipeline::{RunMode, plan_update, run_update};
use locus_sync::registry_sqlite::SqliteRegistry;
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "locus_sync")]
#[command(version)]
#[command(about = "Reconcile the gene locus registry with Ensembl and HGNC")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the update against the configured registry
    Run {
        /// JSON config file
        #[arg(long)]
        config: PathBuf,

        /// Ensembl release to update to
        #[arg(long, required_unless_present = "symbols_only")]
        release: Option<String>,

        /// Only update symbols and identifiers from HGNC
        #[arg(long, conflicts_with = "release")]
        symbols_only: bool,
    },

    /// Print the primary and prune plans for a release without applying them
    Plan {
        #[arg(long)]
        config: PathBuf,

        #[arg(long)]
        release: String,
    },

    /// Check foreign keys into the locus table
    Check {
        #[arg(long)]
        config: PathBuf,
    },
}

fn load_config(path: &PathBuf) -> Result<SyncConfig> {
    SyncConfig::from_json_file(&path.to_string_lossy())
        .with_context(|| format!("loading config {}", path.display()))
}

fn open_registry(config: &SyncConfig) -> Result<SqliteRegistry> {
    let registry = SqliteRegistry::open(&config.database_path)?;
    registry.create_schema()?;
    Ok(registry)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Run {
            config,
            release,
            symbols_only,
        } => {
            let config = load_config(&config)?;
            let mode = match (release, symbols_only) {
                (_, true) => RunMode::SymbolsOnly,
                (Some(release), false) => RunMode::Full { release },
                (None, false) => bail!("either --release or --symbols-only is required"),
            };
            let mut registry = open_registry(&config)?;
            let summary = run_update(&config, &mut registry, &mode)?;
            print_json(&summary)
        }
        Commands::Plan { config, release } => {
            let config = load_config(&config)?;
            let registry = open_registry(&config)?;
            let plan = plan_update(&config, &registry, &release)?;
            print_json(&plan)
        }
        Commands::Check { config } => {
            let config = load_config(&config)?;
            let registry = open_registry(&config)?;
            let dangling = integrity::scan(&registry, &config.foreign_key_tables)?;
            print_json(&dangling)?;
            if !dangling.is_empty() {
                bail!("{} table(s) reference missing loci", dangling.len());
            }
            Ok(())
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
