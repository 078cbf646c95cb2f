//! CLI command definitions and argument parsing.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Provenance CLI - Record and query Maven build artifact provenance.
#[derive(Debug, Parser)]
#[command(name = "provenance")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output format
    #[arg(short, long, value_enum, global = true)]
    pub format: Option<CliFormat>,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Database file (overrides the configured path)
    #[arg(short, long, global = true, env = "PROVENANCE_DB")]
    pub database: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Output format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CliFormat {
    /// Table format (default)
    Table,
    /// JSON format
    Json,
    /// Quiet format (identifiers only)
    Quiet,
}

/// Direction of a lineage walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Direction {
    /// Builds this build depends on
    Up,
    /// Builds that depend on this build
    Down,
}

/// CLI commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show every build that produced or consumed an artifact
    Fingerprint {
        /// Artifact checksum (hex)
        checksum: String,
    },

    /// Show the artifacts a build depends on
    Upstream {
        /// Build (format: job/path#number)
        build: String,
    },

    /// Show the builds that depend on an artifact
    Downstream {
        /// Artifact checksum (hex)
        checksum: String,
    },

    /// Walk a build's lineage transitively
    Lineage {
        /// Build (format: job/path#number)
        build: String,

        /// Walk direction
        #[arg(short = 'D', long, value_enum, default_value = "up")]
        direction: Direction,
    },

    /// Ingest a JSON Lines file of build events
    Replay(ReplayArgs),

    /// Compute SHA-256 fingerprints of files
    Hash {
        /// Files to fingerprint
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Delete one build and its records
    DeleteBuild {
        /// Build (format: job/path#number)
        build: String,

        /// Skip confirmation prompt
        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// Delete every build of a job, including nested jobs
    DeleteJob {
        /// Job path
        job: String,

        /// Skip confirmation prompt
        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// Move a job and its nested jobs to a new path
    RenameJob {
        /// Current job path
        from: String,

        /// New job path
        to: String,
    },

    /// Delete builds older than the retention window
    Cleanup(CleanupArgs),

    /// Show storage and index counts
    Stats,

    /// Ingest JSON Lines events from stdin until EOF or Ctrl+C
    Serve,
}

/// Arguments for the replay command.
#[derive(Debug, Parser)]
pub struct ReplayArgs {
    /// Events file, one JSON object per line
    pub file: PathBuf,

    /// Keep going after a rejected event
    #[arg(long)]
    pub keep_going: bool,
}

/// Arguments for the cleanup command.
#[derive(Debug, Parser)]
pub struct CleanupArgs {
    /// Maximum build age in days (overrides configuration)
    #[arg(long)]
    pub days: Option<u64>,

    /// List expired builds without deleting them
    #[arg(long)]
    pub dry_run: bool,
}

impl From<CliFormat> for crate::config::OutputFormat {
    fn from(format: CliFormat) -> Self {
        match format {
            CliFormat::Table => crate::config::OutputFormat::Table,
            CliFormat::Json => crate::config::OutputFormat::Json,
            CliFormat::Quiet => crate::config::OutputFormat::Quiet,
        }
    }
}
