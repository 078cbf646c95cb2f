//! Trait definitions for external interactions
//!
//! These traits define the boundary between the provenance model and durable
//! storage. Infrastructure implementations live in other crates.

use crate::{BuildId, BuildRecord, DependencyRecord, Fingerprint, GenerationRecord};

/// Classification of a storage failure, used to decide whether to retry
pub trait DaoFailure {
    /// The DAO has been closed; the operation must not be retried
    fn is_closed(&self) -> bool;

    /// The failure is expected to clear on its own (busy database, I/O hiccup)
    fn is_transient(&self) -> bool;

    /// The write collided with a build that is already finalized in storage
    fn is_conflict(&self) -> bool;
}

/// Persistence façade owning the canonical build, generation and dependency records
///
/// Implemented by the infrastructure layer (provenance-store). Every method takes
/// `&self`: implementations are shared between concurrently ingesting builds and
/// manage their own synchronization. Any call may block on storage I/O.
pub trait ProvenanceDao: Send + Sync {
    /// Error type for DAO operations
    type Error: DaoFailure + std::error::Error + Send + Sync + 'static;

    /// Insert a build record, or finalize a stored `running` one (atomic)
    ///
    /// A build already stored with a terminal status is never overwritten;
    /// the call fails with an error whose [`DaoFailure::is_conflict`] holds.
    fn insert_build_record(&self, record: &BuildRecord) -> Result<(), Self::Error>;

    /// Insert a generation record (atomic); returns it with its canonical flag decided
    fn insert_generation_record(
        &self,
        record: &GenerationRecord,
    ) -> Result<GenerationRecord, Self::Error>;

    /// Insert a dependency record (atomic); duplicates are ignored
    fn insert_dependency_record(&self, record: &DependencyRecord) -> Result<(), Self::Error>;

    /// Persist a finished build together with all of its records in one transaction
    ///
    /// Fails with a conflict if the build is already finalized in storage.
    fn commit_build(
        &self,
        build: &BuildRecord,
        generations: &[GenerationRecord],
        dependencies: &[DependencyRecord],
    ) -> Result<CommitReceipt, Self::Error>;

    /// Get a build record by ID
    fn find_build(&self, id: &BuildId) -> Result<Option<BuildRecord>, Self::Error>;

    /// Get a build together with its generations and dependencies
    fn load_build(&self, id: &BuildId) -> Result<Option<CommitReceipt>, Self::Error>;

    /// Get the canonical (first) producer of a fingerprint
    fn find_generation_record(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<Option<GenerationRecord>, Self::Error>;

    /// Get every recorded generation of a fingerprint, oldest first
    fn find_generation_records(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<Vec<GenerationRecord>, Self::Error>;

    /// Get the dependencies declared by a build
    fn find_dependency_records(&self, build: &BuildId)
        -> Result<Vec<DependencyRecord>, Self::Error>;

    /// Get every dependency declared on a fingerprint
    fn find_dependents(&self, fingerprint: &Fingerprint)
        -> Result<Vec<DependencyRecord>, Self::Error>;

    /// Load every persisted record in insertion order (index replay source)
    fn load_all(&self) -> Result<ProvenanceSnapshot, Self::Error>;

    /// Delete a build and its records; returns whether it existed
    fn delete_build(&self, id: &BuildId) -> Result<bool, Self::Error>;

    /// Delete every build of a job and of the jobs nested under it; returns the deleted IDs
    fn delete_job(&self, job: &str) -> Result<Vec<BuildId>, Self::Error>;

    /// Move every build of a job to a new job path; returns `(old, new)` ID pairs
    fn rename_job(&self, from: &str, to: &str) -> Result<Vec<(BuildId, BuildId)>, Self::Error>;

    /// Finished builds started before `cutoff` (milliseconds since Unix epoch)
    fn find_builds_before(&self, cutoff: u64) -> Result<Vec<BuildId>, Self::Error>;

    /// Delete finished builds started before `cutoff`; returns the deleted IDs
    fn delete_builds_before(&self, cutoff: u64) -> Result<Vec<BuildId>, Self::Error>;

    /// Row counts for reporting
    fn stats(&self) -> Result<DaoStats, Self::Error>;

    /// Release all held resources; idempotent
    fn close(&self) -> Result<(), Self::Error>;

    /// Whether [`ProvenanceDao::close`] has been called
    fn is_closed(&self) -> bool;
}

/// Result of a successful [`ProvenanceDao::commit_build`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitReceipt {
    /// The persisted build record
    pub build: BuildRecord,

    /// Generations written, with canonical flags as decided by the DAO
    pub generations: Vec<GenerationRecord>,

    /// Dependencies written (duplicates dropped)
    pub dependencies: Vec<DependencyRecord>,
}

/// Every persisted record, in insertion order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvenanceSnapshot {
    /// Build records
    pub builds: Vec<BuildRecord>,

    /// Generation records
    pub generations: Vec<GenerationRecord>,

    /// Dependency records
    pub dependencies: Vec<DependencyRecord>,
}

/// Row counts reported by [`ProvenanceDao::stats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DaoStats {
    /// Persisted builds
    pub builds: usize,

    /// Persisted generation records
    pub generations: usize,

    /// Persisted dependency records
    pub dependencies: usize,

    /// Distinct fingerprints that have a producer
    pub fingerprints: usize,

    /// Dependency records whose fingerprint has no producer
    pub external_dependencies: usize,
}
