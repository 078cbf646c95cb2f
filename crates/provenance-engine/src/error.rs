//! Error types for ingestion and engine operations

use crate::pipeline::BuildPhase;
use provenance_domain::{BuildId, DaoFailure};
use provenance_index::GraphError;
use thiserror::Error;

/// Errors that can occur while ingesting or querying provenance
#[derive(Error, Debug)]
pub enum IngestError {
    /// Event for a build that was never started
    #[error("Unknown build: {0}")]
    UnknownBuild(BuildId),

    /// Second start for a build the pipeline already knows
    #[error("Build already started: {0}")]
    AlreadyStarted(BuildId),

    /// The build is already finalized in storage and cannot be ingested again
    #[error("Build already committed: {0}")]
    AlreadyCommitted(BuildId),

    /// Event not allowed in the build's current phase
    #[error("Invalid transition for {build}: {event} while {from}")]
    InvalidTransition {
        /// The build
        build: BuildId,
        /// Phase the build was in
        from: BuildPhase,
        /// Rejected event
        event: &'static str,
    },

    /// Malformed job path, checksum, scope or status
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The build's records could not be persisted; provenance for it is lost
    #[error("Commit of {build} failed after {attempts} attempt(s): {source}")]
    CommitFailed {
        /// The build
        build: BuildId,
        /// Attempts made, including the first
        attempts: u32,
        /// Last storage error
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Operation attempted after the DAO was closed
    #[error("DAO is closed")]
    DaoClosed,

    /// Storage failure outside of a build commit
    #[error("Storage error: {0}")]
    Storage(String),

    /// Graph traversal error
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Worker error (tokio runtime issues)
    #[error("Worker error: {0}")]
    Worker(String),
}

impl IngestError {
    /// Map a DAO error, keeping the closed case distinguishable
    pub(crate) fn from_dao<E: DaoFailure + std::fmt::Display>(err: E) -> Self {
        if err.is_closed() {
            IngestError::DaoClosed
        } else {
            IngestError::Storage(err.to_string())
        }
    }
}
