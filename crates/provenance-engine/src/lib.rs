//! Provenance Engine
//!
//! Records which build produced each artifact and which builds consumed it,
//! and answers lineage queries over that history.
//!
//! # Overview
//!
//! The engine is responsible for:
//! - **Ingestion**: Buffering a build's artifact and dependency events and
//!   committing them atomically when the build completes
//! - **Retries**: Retrying commits on transient storage failures with
//!   exponential backoff
//! - **Queries**: Serving fingerprint, upstream and downstream lookups from
//!   in-memory indexes
//! - **Maintenance**: Deleting builds and jobs, renaming jobs, and age-based
//!   retention
//!
//! # Build lifecycle
//!
//! | Phase | Entered on | Leaves on |
//! |-------|------------|-----------|
//! | **Started** | `on_build_start` | first artifact or dependency event |
//! | **Collecting** | artifact or dependency event | completion or cancel |
//! | **Finalizing** | `on_build_complete` | commit confirmed or failed |
//! | **Committed** | DAO commit | never |
//! | **Failed** | cancel, retries exhausted, DAO closed | never |
//!
//! Queries see none of a build's records before its commit and all of them
//! after.
//!
//! # Usage
//!
//! ```no_run
//! use provenance_domain::BuildStatus;
//! use provenance_engine::{IngestConfig, ProvenanceEngine};
//! use provenance_store::SqliteDao;
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let dao = Arc::new(SqliteDao::open("provenance.db")?);
//! let engine = ProvenanceEngine::open(dao, IngestConfig::default())?;
//!
//! engine.on_build_start("job/web", 12)?;
//! engine.on_artifact_generated("job/web", 12, "target/app.jar", "abc123")?;
//! engine.on_build_complete("job/web", 12, BuildStatus::Success)?;
//!
//! engine.on_build_start("job/service", 5)?;
//! engine.on_dependency_resolved("job/service", 5, "abc123", "compile")?;
//! engine.on_build_complete("job/service", 5, BuildStatus::Success)?;
//!
//! for occurrence in engine.query_fingerprint("abc123")? {
//!     println!("{} {} {}", occurrence.role, occurrence.build, occurrence.timestamp);
//! }
//! engine.close()?;
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! ```toml
//! database_path = "provenance.db"
//! log_filter = "info"
//!
//! [ingest]
//! max_retries = 3
//! initial_backoff_ms = 50
//! max_backoff_ms = 2000
//! backoff_multiplier = 2
//!
//! [retention]
//! enabled = false
//! max_build_age_days = 90
//! sweep_interval_minutes = 60
//! dry_run = false
//! ```

#![warn(missing_docs)]

mod config;
mod engine;
mod error;
mod event;
mod hash;
mod metrics;
mod pipeline;
mod retention;
mod worker;

pub use config::{EngineConfig, IngestConfig, RetentionConfig};
pub use engine::{now_millis, EngineStats, ProvenanceEngine};
pub use error::IngestError;
pub use event::{read_events, BuildEvent};
pub use hash::{fingerprint_bytes, fingerprint_file};
pub use metrics::{IngestMetrics, RetentionMetrics};
pub use pipeline::{BuildPhase, IngestionPipeline, RECENT_OUTCOMES};
pub use retention::{Retention, SweepReport};
pub use worker::{ProvenanceWorker, WorkerReport};
