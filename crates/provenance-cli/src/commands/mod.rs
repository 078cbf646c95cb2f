//! Command implementations.

mod admin;
mod hash;
mod query;
mod replay;
mod serve;

pub use self::admin::{execute_cleanup, execute_delete_build, execute_delete_job, execute_rename_job, execute_stats};
pub use self::hash::execute_hash;
pub use self::query::{execute_downstream, execute_fingerprint, execute_lineage, execute_upstream};
pub use self::replay::{execute_replay, replay_events, ReplaySummary};
pub use self::serve::execute_serve;

use crate::error::{CliError, Result};
use provenance_domain::BuildId;
use provenance_engine::{IngestConfig, ProvenanceEngine};
use provenance_store::SqliteDao;
use std::path::Path;
use std::sync::Arc;

/// Engine type used by every command.
pub type Engine = ProvenanceEngine<SqliteDao>;

/// Open the database and load the indexes.
pub fn open_engine(database: &Path, ingest: IngestConfig) -> Result<Engine> {
    let dao = SqliteDao::open(database)?;
    Ok(ProvenanceEngine::open(Arc::new(dao), ingest)?)
}

/// Parse a `job/path#number` argument.
pub fn parse_build(value: &str) -> Result<BuildId> {
    BuildId::parse(value).map_err(|e| CliError::InvalidInput(format!("'{}': {}", value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_build() {
        let id = parse_build("folder/job#7").unwrap();
        assert_eq!(id.job(), "folder/job");
        assert_eq!(id.number(), 7);
        assert!(matches!(parse_build("no-number"), Err(CliError::InvalidInput(_))));
    }
}
