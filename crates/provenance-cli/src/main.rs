//! Provenance CLI - Command-line interface for the artifact provenance engine.

use provenance_cli::commands::{self, Engine};
use provenance_cli::{Cli, CliError, Command, Config, Formatter};
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> provenance_cli::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load config from the search path
    let config = Config::load(cli.config.as_deref())?;
    init_tracing(&config.engine.log_filter);
    if let Some(source) = &config.source {
        tracing::debug!("Loaded configuration from {}", source.display());
    }

    // Determine output format and color
    let format = cli.format.map(Into::into).unwrap_or(config.output.format);
    let color_enabled = !cli.no_color && config.output.color;
    let formatter = Formatter::new(format, color_enabled);

    let database = cli
        .database
        .clone()
        .unwrap_or_else(|| config.engine.database_path.clone());

    match cli.command {
        Command::Hash { files } => commands::execute_hash(&files, &formatter),
        Command::Serve => {
            // The worker closes the engine on exit
            let engine = Arc::new(commands::open_engine(&database, config.engine.ingest.clone())?);
            commands::execute_serve(engine, config.engine.retention.clone(), &formatter).await
        }
        command => {
            let engine = commands::open_engine(&database, config.engine.ingest.clone())?;
            let result = dispatch(command, &engine, &config, &formatter);
            engine.close()?;
            result
        }
    }
}

fn dispatch(command: Command, engine: &Engine, config: &Config, formatter: &Formatter) -> provenance_cli::Result<()> {
    match command {
        Command::Fingerprint { checksum } => commands::execute_fingerprint(&checksum, engine, formatter),
        Command::Upstream { build } => commands::execute_upstream(&build, engine, formatter),
        Command::Downstream { checksum } => commands::execute_downstream(&checksum, engine, formatter),
        Command::Lineage { build, direction } => {
            commands::execute_lineage(&build, direction, engine, formatter)
        }
        Command::Replay(args) => commands::execute_replay(args, engine, formatter),
        Command::DeleteBuild { build, yes } => {
            commands::execute_delete_build(&build, yes, engine, formatter)
        }
        Command::DeleteJob { job, yes } => commands::execute_delete_job(&job, yes, engine, formatter),
        Command::RenameJob { from, to } => commands::execute_rename_job(&from, &to, engine, formatter),
        Command::Cleanup(args) => {
            commands::execute_cleanup(args, &config.engine.retention, engine, formatter)
        }
        Command::Stats => commands::execute_stats(engine, formatter),
        Command::Hash { files } => commands::execute_hash(&files, formatter),
        Command::Serve => Err(CliError::InvalidInput(
            "serve must run on the async entry point".to_string(),
        )),
    }
}

/// Install the log subscriber: `RUST_LOG` wins over the configured filter.
fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
