//! Engine façade: host callbacks, queries and maintenance

use crate::{BuildEvent, BuildPhase, IngestConfig, IngestError, IngestMetrics, IngestionPipeline};
use parking_lot::{Mutex, RwLock};
use provenance_domain::{
    BuildId, BuildStatus, CommitReceipt, DaoStats, Fingerprint, GenerationRecord, Occurrence,
    ProvenanceDao, Scope,
};
use provenance_index::ProvenanceIndex;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

/// Current time in milliseconds since the Unix epoch
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Counts reported by [`ProvenanceEngine::stats`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStats {
    /// Persisted row counts
    pub stored: DaoStats,

    /// Distinct fingerprints in the in-memory index
    pub indexed_fingerprints: usize,

    /// Builds in the in-memory dependency graph
    pub indexed_consumers: usize,

    /// Builds with an open ingestion session
    pub in_flight: usize,

    /// Pipeline counters since start-up
    pub ingest: IngestMetrics,
}

/// One change applied to the in-memory indexes
#[derive(Debug, Clone)]
enum IndexChange {
    Commit(CommitReceipt),
    Remove(BuildId),
}

impl IndexChange {
    fn apply(&self, index: &ProvenanceIndex) {
        match self {
            IndexChange::Commit(receipt) => index.apply_commit(receipt),
            IndexChange::Remove(id) => index.remove_build(id),
        }
    }
}

/// Index changes made while a rebuild is loading, replayed over its snapshot
#[derive(Debug, Default)]
struct RebuildLog {
    active: usize,
    changes: Vec<IndexChange>,
}

/// Records build provenance and answers lineage queries
///
/// Writes go through the ingestion pipeline to the DAO; reads are served from
/// in-memory indexes that are updated after each commit and rebuilt from the
/// DAO on start-up and after bulk maintenance.
pub struct ProvenanceEngine<D: ProvenanceDao> {
    dao: Arc<D>,
    pipeline: IngestionPipeline<D>,
    index: ProvenanceIndex,
    // Held shared while applying a commit, exclusively for maintenance deltas
    maintenance: RwLock<()>,
    rebuild_log: Mutex<RebuildLog>,
}

impl<D: ProvenanceDao> ProvenanceEngine<D> {
    /// Create an engine with empty indexes
    pub fn new(dao: Arc<D>, config: IngestConfig) -> Self {
        Self {
            pipeline: IngestionPipeline::new(Arc::clone(&dao), config),
            dao,
            index: ProvenanceIndex::new(),
            maintenance: RwLock::new(()),
            rebuild_log: Mutex::new(RebuildLog::default()),
        }
    }

    /// Create an engine and load its indexes from persisted records
    pub fn open(dao: Arc<D>, config: IngestConfig) -> Result<Self, IngestError> {
        let engine = Self::new(dao, config);
        engine.rebuild_indexes()?;
        Ok(engine)
    }

    /// The underlying DAO
    pub fn dao(&self) -> &Arc<D> {
        &self.dao
    }

    /// The ingestion pipeline
    pub fn pipeline(&self) -> &IngestionPipeline<D> {
        &self.pipeline
    }

    /// The in-memory indexes
    pub fn index(&self) -> &ProvenanceIndex {
        &self.index
    }

    fn ensure_open(&self) -> Result<(), IngestError> {
        if self.dao.is_closed() {
            Err(IngestError::DaoClosed)
        } else {
            Ok(())
        }
    }

    fn build_id(job: &str, number: u32) -> Result<BuildId, IngestError> {
        BuildId::new(job, number).map_err(IngestError::InvalidInput)
    }

    fn fingerprint(checksum: &str) -> Result<Fingerprint, IngestError> {
        Fingerprint::new(checksum).map_err(IngestError::InvalidInput)
    }

    // ---- host callbacks ----

    /// A build started now
    pub fn on_build_start(&self, job: &str, number: u32) -> Result<(), IngestError> {
        self.on_build_start_at(job, number, now_millis())
    }

    /// A build started at the given time (milliseconds since the epoch)
    pub fn on_build_start_at(&self, job: &str, number: u32, started_at: u64) -> Result<(), IngestError> {
        self.ensure_open()?;
        self.pipeline.start(Self::build_id(job, number)?, started_at)
    }

    /// A build wrote a fingerprinted artifact
    pub fn on_artifact_generated(
        &self,
        job: &str,
        number: u32,
        file_path: &str,
        checksum: &str,
    ) -> Result<(), IngestError> {
        self.ensure_open()?;
        let id = Self::build_id(job, number)?;
        self.pipeline
            .artifact_generated(&id, file_path, Self::fingerprint(checksum)?)
    }

    /// A build resolved a dependency in the given Maven scope
    pub fn on_dependency_resolved(
        &self,
        job: &str,
        number: u32,
        checksum: &str,
        scope: &str,
    ) -> Result<(), IngestError> {
        self.ensure_open()?;
        let id = Self::build_id(job, number)?;
        let scope: Scope = scope.parse().map_err(IngestError::InvalidInput)?;
        self.pipeline
            .dependency_resolved(&id, Self::fingerprint(checksum)?, scope)
    }

    /// A build finished now; its records are committed
    pub fn on_build_complete(
        &self,
        job: &str,
        number: u32,
        status: BuildStatus,
    ) -> Result<CommitReceipt, IngestError> {
        self.on_build_complete_at(job, number, status, now_millis())
    }

    /// A build finished at the given time; its records are committed
    ///
    /// If the DAO is closed the build fails and `DaoClosed` is returned.
    pub fn on_build_complete_at(
        &self,
        job: &str,
        number: u32,
        status: BuildStatus,
        completed_at: u64,
    ) -> Result<CommitReceipt, IngestError> {
        let id = Self::build_id(job, number)?;
        let result = self.pipeline.complete(&id, status, completed_at, |receipt| {
            let _shared = self.maintenance.read();
            self.index.apply_commit(receipt);
            let mut log = self.rebuild_log.lock();
            if log.active > 0 {
                log.changes.push(IndexChange::Commit(receipt.clone()));
            }
        });
        match result {
            Err(IngestError::UnknownBuild(_) | IngestError::InvalidTransition { .. })
                if self.dao.is_closed() =>
            {
                Err(IngestError::DaoClosed)
            }
            other => other,
        }
    }

    /// Abandon a build before completion; nothing is persisted
    pub fn cancel_build(&self, job: &str, number: u32) -> Result<(), IngestError> {
        self.ensure_open()?;
        self.pipeline.cancel(&Self::build_id(job, number)?)
    }

    /// Phase of a build as seen by this engine
    pub fn build_phase(&self, job: &str, number: u32) -> Result<Option<BuildPhase>, IngestError> {
        Ok(self.pipeline.state_of(&Self::build_id(job, number)?))
    }

    /// Dispatch a serialized host event
    ///
    /// Returns the commit receipt for `build_completed` events.
    pub fn apply_event(&self, event: BuildEvent) -> Result<Option<CommitReceipt>, IngestError> {
        match event {
            BuildEvent::BuildStarted { job, number, timestamp } => {
                self.on_build_start_at(&job, number, timestamp.unwrap_or_else(now_millis))?;
            }
            BuildEvent::ArtifactGenerated { job, number, file_path, checksum } => {
                self.on_artifact_generated(&job, number, &file_path, &checksum)?;
            }
            BuildEvent::DependencyResolved { job, number, checksum, scope } => {
                self.on_dependency_resolved(&job, number, &checksum, &scope)?;
            }
            BuildEvent::BuildCompleted { job, number, status, timestamp } => {
                let status: BuildStatus = status.parse().map_err(IngestError::InvalidInput)?;
                let receipt = self.on_build_complete_at(
                    &job,
                    number,
                    status,
                    timestamp.unwrap_or_else(now_millis),
                )?;
                return Ok(Some(receipt));
            }
            BuildEvent::BuildCancelled { job, number } => {
                self.cancel_build(&job, number)?;
            }
        }
        Ok(None)
    }

    // ---- queries ----

    /// Every build that produced or consumed the artifact, oldest first
    ///
    /// An unknown checksum yields an empty list.
    pub fn query_fingerprint(&self, checksum: &str) -> Result<Vec<Occurrence>, IngestError> {
        self.ensure_open()?;
        Ok(self.index.fingerprints().lookup(&Self::fingerprint(checksum)?))
    }

    /// Fingerprints the build depends on
    pub fn query_upstream(&self, job: &str, number: u32) -> Result<BTreeSet<Fingerprint>, IngestError> {
        self.ensure_open()?;
        Ok(self.index.graph().upstream_of(&Self::build_id(job, number)?))
    }

    /// Builds that depend on the artifact
    pub fn query_downstream(&self, checksum: &str) -> Result<BTreeSet<BuildId>, IngestError> {
        self.ensure_open()?;
        Ok(self.index.graph().downstream_of(&Self::fingerprint(checksum)?))
    }

    /// Canonical producer of the artifact, read from storage
    pub fn query_producer(&self, checksum: &str) -> Result<Option<GenerationRecord>, IngestError> {
        let fingerprint = Self::fingerprint(checksum)?;
        self.dao
            .find_generation_record(&fingerprint)
            .map_err(IngestError::from_dao)
    }

    /// Builds whose outputs the build consumed directly
    pub fn query_upstream_builds(&self, job: &str, number: u32) -> Result<BTreeSet<BuildId>, IngestError> {
        self.ensure_open()?;
        Ok(self.index.graph().upstream_builds(&Self::build_id(job, number)?))
    }

    /// Builds that consumed the build's outputs directly
    pub fn query_downstream_builds(&self, job: &str, number: u32) -> Result<BTreeSet<BuildId>, IngestError> {
        self.ensure_open()?;
        Ok(self.index.graph().downstream_builds(&Self::build_id(job, number)?))
    }

    /// Every build the build transitively depends on
    pub fn query_transitive_upstream(
        &self,
        job: &str,
        number: u32,
    ) -> Result<BTreeSet<BuildId>, IngestError> {
        self.ensure_open()?;
        let id = Self::build_id(job, number)?;
        self.index
            .graph()
            .transitive_upstream(&id)
            .map_err(|e| {
                warn!(build = %id, error = %e, "Upstream traversal aborted");
                e.into()
            })
    }

    /// Every build that transitively depends on the build
    pub fn query_transitive_downstream(
        &self,
        job: &str,
        number: u32,
    ) -> Result<BTreeSet<BuildId>, IngestError> {
        self.ensure_open()?;
        let id = Self::build_id(job, number)?;
        self.index
            .graph()
            .transitive_downstream(&id)
            .map_err(|e| {
                warn!(build = %id, error = %e, "Downstream traversal aborted");
                e.into()
            })
    }

    // ---- maintenance ----

    /// Replace the in-memory indexes with the persisted records
    ///
    /// Commits and deletions that land while the records load are replayed
    /// over the loaded snapshot.
    pub fn rebuild_indexes(&self) -> Result<(), IngestError> {
        self.rebuild_log.lock().active += 1;
        let loaded = self.dao.load_all().map_err(IngestError::from_dao);

        let _exclusive = self.maintenance.write();
        let mut log = self.rebuild_log.lock();
        log.active -= 1;
        if let Ok(snapshot) = &loaded {
            self.index.rebuild(snapshot);
            for change in &log.changes {
                change.apply(&self.index);
            }
        }
        if log.active == 0 {
            log.changes.clear();
        }
        loaded.map(|_| ())
    }

    /// Apply maintenance changes to the indexes, after the DAO call returned
    fn apply_changes(&self, changes: Vec<IndexChange>) {
        if changes.is_empty() {
            return;
        }
        let _exclusive = self.maintenance.write();
        for change in &changes {
            change.apply(&self.index);
        }
        let mut log = self.rebuild_log.lock();
        if log.active > 0 {
            log.changes.extend(changes);
        }
    }

    fn remove_builds(&self, ids: &[BuildId]) {
        self.apply_changes(ids.iter().cloned().map(IndexChange::Remove).collect());
        self.pipeline.forget(ids);
    }

    /// Delete one build and its records
    pub fn delete_build(&self, job: &str, number: u32) -> Result<bool, IngestError> {
        let id = Self::build_id(job, number)?;
        let deleted = self.dao.delete_build(&id).map_err(IngestError::from_dao)?;
        if deleted {
            self.remove_builds(std::slice::from_ref(&id));
            info!(build = %id, "Build deleted");
        }
        Ok(deleted)
    }

    /// Delete every build of a job and of the jobs nested under it
    pub fn delete_job(&self, job: &str) -> Result<usize, IngestError> {
        let deleted = self.dao.delete_job(job).map_err(IngestError::from_dao)?;
        self.remove_builds(&deleted);
        info!(job, deleted = deleted.len(), "Job deleted");
        Ok(deleted.len())
    }

    /// Move a job, and the jobs nested under it, to a new path
    pub fn rename_job(&self, from: &str, to: &str) -> Result<usize, IngestError> {
        let moved = self.dao.rename_job(from, to).map_err(IngestError::from_dao)?;

        let mut changes: Vec<IndexChange> = moved
            .iter()
            .map(|(old, _)| IndexChange::Remove(old.clone()))
            .collect();
        for (_, new) in &moved {
            if let Some(receipt) = self.dao.load_build(new).map_err(IngestError::from_dao)? {
                changes.push(IndexChange::Commit(receipt));
            }
        }
        self.apply_changes(changes);
        self.pipeline.forget(moved.iter().map(|(old, _)| old));

        info!(from, to, moved = moved.len(), "Job renamed");
        Ok(moved.len())
    }

    /// Finished builds started before the cutoff
    pub fn find_builds_before(&self, cutoff: u64) -> Result<Vec<BuildId>, IngestError> {
        self.dao
            .find_builds_before(cutoff)
            .map_err(IngestError::from_dao)
    }

    /// Delete finished builds started before the cutoff
    pub fn delete_builds_before(&self, cutoff: u64) -> Result<Vec<BuildId>, IngestError> {
        let deleted = self
            .dao
            .delete_builds_before(cutoff)
            .map_err(IngestError::from_dao)?;
        self.remove_builds(&deleted);
        Ok(deleted)
    }

    /// Persisted and in-memory counts
    pub fn stats(&self) -> Result<EngineStats, IngestError> {
        let stored = self.dao.stats().map_err(IngestError::from_dao)?;
        Ok(EngineStats {
            stored,
            indexed_fingerprints: self.index.fingerprints().len(),
            indexed_consumers: self.index.graph().consumer_count(),
            in_flight: self.pipeline.in_flight().len(),
            ingest: self.pipeline.metrics(),
        })
    }

    /// Pipeline counters since start-up
    pub fn metrics(&self) -> IngestMetrics {
        self.pipeline.metrics()
    }

    /// Close the DAO; builds still collecting fail without being committed
    ///
    /// Idempotent. Blocks until an in-flight DAO operation returns.
    pub fn close(&self) -> Result<(), IngestError> {
        self.dao.close().map_err(IngestError::from_dao)?;
        let abandoned = self.pipeline.abandon_all();
        if !abandoned.is_empty() {
            warn!(builds = abandoned.len(), "Closed with builds still collecting");
        }
        info!("Provenance engine closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use provenance_store::SqliteDao;

    fn engine() -> ProvenanceEngine<SqliteDao> {
        ProvenanceEngine::open(Arc::new(SqliteDao::in_memory().unwrap()), IngestConfig::default())
            .unwrap()
    }

    #[test]
    fn test_invalid_input_rejected() {
        let engine = engine();
        assert!(matches!(
            engine.on_build_start("", 1),
            Err(IngestError::InvalidInput(_))
        ));
        engine.on_build_start("job/a", 1).unwrap();
        assert!(matches!(
            engine.on_artifact_generated("job/a", 1, "a.jar", "not-hex!"),
            Err(IngestError::InvalidInput(_))
        ));
        assert!(matches!(
            engine.on_dependency_resolved("job/a", 1, "aa", "bundled"),
            Err(IngestError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_apply_event_returns_receipt_on_completion() {
        let engine = engine();
        let events = [
            r#"{"event":"build_started","job":"job/a","number":1,"timestamp":100}"#,
            r#"{"event":"artifact_generated","job":"job/a","number":1,"file_path":"a.jar","checksum":"aa"}"#,
            r#"{"event":"build_completed","job":"job/a","number":1,"status":"success","timestamp":180}"#,
        ];
        let mut receipts = Vec::new();
        for line in events {
            if let Some(receipt) = engine.apply_event(BuildEvent::from_json(line).unwrap()).unwrap() {
                receipts.push(receipt);
            }
        }
        assert_eq!(receipts.len(), 1);
        assert_eq!(receipts[0].build.duration_ms, Some(80));
        assert_eq!(
            engine.build_phase("job/a", 1).unwrap(),
            Some(BuildPhase::Committed)
        );
    }

    #[test]
    fn test_unknown_status_rejected() {
        let engine = engine();
        engine.on_build_start("job/a", 1).unwrap();
        let event = BuildEvent::BuildCompleted {
            job: "job/a".to_string(),
            number: 1,
            status: "exploded".to_string(),
            timestamp: None,
        };
        assert!(matches!(engine.apply_event(event), Err(IngestError::InvalidInput(_))));
        assert_eq!(engine.build_phase("job/a", 1).unwrap(), Some(BuildPhase::Started));
    }

    #[test]
    fn test_events_after_close_rejected() {
        let engine = engine();
        engine.close().unwrap();
        engine.close().unwrap();
        assert!(matches!(engine.on_build_start("job/a", 1), Err(IngestError::DaoClosed)));
        assert!(matches!(engine.query_fingerprint("aa"), Err(IngestError::DaoClosed)));
        assert!(matches!(engine.stats(), Err(IngestError::DaoClosed)));
    }

    #[test]
    fn test_close_fails_collecting_builds() {
        let engine = engine();
        engine.on_build_start_at("job/open", 1, 10).unwrap();
        engine.on_artifact_generated("job/open", 1, "open.jar", "aa").unwrap();

        engine.close().unwrap();
        assert_eq!(engine.build_phase("job/open", 1).unwrap(), Some(BuildPhase::Failed));
        assert!(engine.pipeline().in_flight().is_empty());
        assert!(matches!(
            engine.on_build_complete_at("job/open", 1, BuildStatus::Success, 20),
            Err(IngestError::DaoClosed)
        ));
        assert_eq!(engine.metrics().failed, 1);
    }

    #[test]
    fn test_complete_on_closed_dao_fails_build() {
        let engine = engine();
        engine.on_build_start_at("job/open", 1, 10).unwrap();
        engine.on_artifact_generated("job/open", 1, "open.jar", "aa").unwrap();

        // Storage goes away underneath the engine
        engine.dao().close().unwrap();
        assert!(matches!(
            engine.on_build_complete_at("job/open", 1, BuildStatus::Success, 20),
            Err(IngestError::DaoClosed)
        ));
        assert_eq!(engine.build_phase("job/open", 1).unwrap(), Some(BuildPhase::Failed));
        assert!(engine.pipeline().in_flight().is_empty());
        assert!(engine.query_fingerprint("aa").is_err());
    }

    #[test]
    fn test_rename_updates_index_like_a_rebuild() {
        let engine = engine();
        engine.on_build_start_at("folder/lib", 1, 10).unwrap();
        engine.on_artifact_generated("folder/lib", 1, "lib.jar", "11").unwrap();
        engine.on_build_complete_at("folder/lib", 1, BuildStatus::Success, 20).unwrap();
        engine.on_build_start_at("job/app", 1, 30).unwrap();
        engine.on_dependency_resolved("job/app", 1, "11", "compile").unwrap();
        engine.on_build_complete_at("job/app", 1, BuildStatus::Success, 40).unwrap();

        assert_eq!(engine.rename_job("folder/lib", "folder/core").unwrap(), 1);
        let incremental = engine.index().snapshot();
        engine.rebuild_indexes().unwrap();
        assert_eq!(engine.index().snapshot(), incremental);
        assert_eq!(
            engine.query_upstream_builds("job/app", 1).unwrap(),
            BTreeSet::from([BuildId::new("folder/core", 1).unwrap()])
        );
    }
}
