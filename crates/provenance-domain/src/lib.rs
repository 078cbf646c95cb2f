//! Provenance Domain Layer
//!
//! This crate contains the domain model for build artifact provenance.
//! It has ZERO external dependencies and defines the value objects and the
//! persistence trait that the store, index, and engine crates build upon.
//!
//! ## Key Concepts
//!
//! - **Build**: one execution of a job, identified as `job/path#number`
//! - **Fingerprint**: a content checksum acting as an artifact's identity
//! - **Generation**: a build produced a fingerprinted file
//! - **Dependency**: a build consumed a fingerprinted artifact under a scope
//! - **Occurrence**: one appearance of a fingerprint in a build, produced or consumed
//!
//! ## Architecture
//!
//! - No external crate dependencies
//! - Records are plain values; canonical storage lives behind [`traits::ProvenanceDao`]
//! - Indexes over these records are derived and rebuildable

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod build;
pub mod fingerprint;
pub mod record;
pub mod traits;

// Re-exports for convenience
pub use build::{validate_job_path, BuildId, BuildRecord, BuildStatus};
pub use fingerprint::{ArtifactFingerprint, Fingerprint};
pub use record::{DependencyRecord, GenerationRecord, Occurrence, Role, Scope};
pub use traits::{CommitReceipt, DaoFailure, DaoStats, ProvenanceDao, ProvenanceSnapshot};
