use anyhow::{Context, Result};
use clap::Parser;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod aggregator;
mod catalog;
mod cli_output;
mod config;
mod discovery;
mod engine;
mod error;
mod orchestrator;
mod render;
mod report;
mod session;

use catalog::DescriptorCatalog;
use cli_output::BatchConsole;
use config::{load_commands, BatchConfig, ARTIFACT_EXTENSIONS};
use discovery::ArtifactDiscovery;
use engine::R2PipeEngine;
use error::ConfigError;
use orchestrator::Orchestrator;
use render::{PositionalRenderer, TableCommands};
use session::AnalysisTask;

#[derive(Parser)]
#[command(name = "r2report")]
#[command(about = "Batch-analyze PE binaries with radare2 and write HTML reports", long_about = None)]
#[command(version)]
struct Cli {
    /// Number of concurrent engine sessions (1-50)
    #[arg(short, long, default_value_t = 5, allow_negative_numbers = true)]
    concurrency: i64,

    /// File with one engine command per line
    #[arg(short, long, default_value = "kom.txt")]
    file: PathBuf,

    /// CSV with Function and Description columns
    #[arg(long, default_value = "func.csv")]
    func: PathBuf,

    /// Directory receiving the reports
    #[arg(short, long, default_value = "log_dis")]
    output_dir: PathBuf,

    /// Directory scanned for .exe and .dll files
    #[arg(short, long, default_value = ".")]
    dir: PathBuf,

    /// Engine executable
    #[arg(long, default_value = "radare2")]
    engine: String,

    /// Command rendered as the imports table
    #[arg(long, default_value = "ii")]
    imports_cmd: String,

    /// Command rendered as the exports table
    #[arg(long, default_value = "iE")]
    exports_cmd: String,

    /// Commands starting with this are rendered as the strings table
    #[arg(long, default_value = "izz")]
    strings_prefix: String,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn into_config(self) -> BatchConfig {
        BatchConfig {
            concurrency: self.concurrency,
            commands_file: self.file,
            catalog_file: self.func,
            output_dir: self.output_dir,
            scan_dir: self.dir,
            engine: self.engine,
            table_commands: TableCommands {
                imports: self.imports_cmd,
                exports: self.exports_cmd,
                strings_prefix: self.strings_prefix,
            },
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // RUST_LOG wins, otherwise the verbose flag picks the level
    let env_filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if cli.verbose {
        EnvFilter::new("r2report=debug")
    } else {
        EnvFilter::new("r2report=info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let console = BatchConsole::auto();
    match run(cli.into_config(), console) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            BatchConsole::auto().error(&format!("{:#}", e));
            ExitCode::from(1)
        }
    }
}

fn run(config: BatchConfig, console: BatchConsole) -> Result<()> {
    config.validate()?;

    let catalog = DescriptorCatalog::load(&config.catalog_file)
        .map_err(ConfigError::from)
        .with_context(|| format!("Cannot load {}", config.catalog_file.display()))?;
    if catalog.is_empty() {
        warn!(
            "{} has no entries; every import will be reported as missing",
            config.catalog_file.display()
        );
    } else {
        info!("Loaded {} function descriptions", catalog.len());
    }

    let commands: Arc<[String]> = load_commands(&config.commands_file)?.into();
    if commands.is_empty() {
        warn!(
            "{} contains no commands; reports will be empty",
            config.commands_file.display()
        );
    }

    fs::create_dir_all(&config.output_dir).with_context(|| {
        format!(
            "Failed to create output directory {}",
            config.output_dir.display()
        )
    })?;

    let artifacts = ArtifactDiscovery::new(config.scan_dir.clone(), &ARTIFACT_EXTENSIONS).scan()?;
    let tasks: Vec<AnalysisTask> = artifacts
        .into_iter()
        .map(|artifact| AnalysisTask::new(artifact, Arc::clone(&commands)))
        .collect();

    let engine = R2PipeEngine::new(config.engine.as_str());
    if !engine.is_available() {
        warn!(
            "Engine '{}' could not be launched; every artifact will fail to open",
            engine.binary()
        );
    }

    let orchestrator = Orchestrator::new(
        engine,
        PositionalRenderer::new(config.table_commands.clone()),
        catalog,
        config.output_dir.clone(),
    )
    .with_console(console);

    let summary = orchestrator.run_batch(&tasks, config.workers())?;
    orchestrator.console().finish(&summary);

    Ok(())
}
