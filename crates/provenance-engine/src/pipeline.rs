//! Per-build ingestion state machine
//!
//! Events for a build are buffered in memory until the host reports
//! completion; the whole record set is then written with a single
//! [`ProvenanceDao::commit_build`] call.

use crate::{IngestConfig, IngestError, IngestMetrics};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use provenance_domain::{
    BuildId, BuildRecord, BuildStatus, CommitReceipt, DaoFailure, DependencyRecord, Fingerprint,
    GenerationRecord, ProvenanceDao, Scope,
};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Terminal outcomes kept in memory; older builds are answered from storage
pub const RECENT_OUTCOMES: usize = 1024;

/// Ingestion phase of one build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuildPhase {
    /// Start seen, no records yet
    Started,

    /// At least one artifact or dependency event seen
    Collecting,

    /// Completion seen, commit in progress
    Finalizing,

    /// Record set persisted
    Committed,

    /// Record set discarded (cancelled or commit failed)
    Failed,
}

impl BuildPhase {
    /// Get the phase name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildPhase::Started => "started",
            BuildPhase::Collecting => "collecting",
            BuildPhase::Finalizing => "finalizing",
            BuildPhase::Committed => "committed",
            BuildPhase::Failed => "failed",
        }
    }

    /// No further events are accepted
    pub fn is_terminal(&self) -> bool {
        matches!(self, BuildPhase::Committed | BuildPhase::Failed)
    }
}

impl fmt::Display for BuildPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Records buffered for a build that has not completed
#[derive(Debug)]
struct BuildSession {
    flow: Uuid,
    record: BuildRecord,
    phase: BuildPhase,
    generations: Vec<GenerationRecord>,
    dependencies: Vec<DependencyRecord>,
}

impl BuildSession {
    fn collecting(&mut self) -> &mut Self {
        if self.phase == BuildPhase::Started {
            self.phase = BuildPhase::Collecting;
            debug!(build = %self.record.id, flow = %self.flow, "Build collecting");
        }
        self
    }
}

/// Drives builds from start to commit
///
/// Sessions live in a sharded map, so builds ingest concurrently and only
/// contend when they hash to the same shard. No session lock is held while
/// the DAO is called.
///
/// Only the most recent terminal outcomes are remembered; whether an older
/// build was committed is read back from the DAO.
pub struct IngestionPipeline<D: ProvenanceDao> {
    dao: Arc<D>,
    config: IngestConfig,
    sessions: DashMap<BuildId, BuildSession>,
    outcomes: DashMap<BuildId, BuildPhase>,
    // Settlement order of `outcomes`, oldest first
    outcome_order: Mutex<VecDeque<BuildId>>,
    outcome_capacity: usize,
    metrics: Mutex<IngestMetrics>,
}

impl<D: ProvenanceDao> IngestionPipeline<D> {
    /// Create a pipeline writing through the given DAO
    pub fn new(dao: Arc<D>, config: IngestConfig) -> Self {
        Self {
            dao,
            config,
            sessions: DashMap::new(),
            outcomes: DashMap::new(),
            outcome_order: Mutex::new(VecDeque::new()),
            outcome_capacity: RECENT_OUTCOMES,
            metrics: Mutex::new(IngestMetrics::new()),
        }
    }

    /// Remember at most `capacity` terminal outcomes
    pub fn with_outcome_capacity(mut self, capacity: usize) -> Self {
        self.outcome_capacity = capacity.max(1);
        self
    }

    /// Retry policy in use
    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Open a session for a new build
    ///
    /// A build already finalized in storage cannot be started again.
    pub fn start(&self, id: BuildId, started_at: u64) -> Result<(), IngestError> {
        let known = self.outcomes.get(&id).map(|phase| *phase);
        match known {
            Some(BuildPhase::Committed) => return Err(IngestError::AlreadyCommitted(id)),
            Some(_) => return Err(IngestError::AlreadyStarted(id)),
            None => {}
        }
        if self.sessions.contains_key(&id) {
            return Err(IngestError::AlreadyStarted(id));
        }
        if self.is_persisted(&id)? {
            return Err(IngestError::AlreadyCommitted(id));
        }
        match self.sessions.entry(id.clone()) {
            Entry::Occupied(_) => Err(IngestError::AlreadyStarted(id)),
            Entry::Vacant(slot) => {
                let flow = Uuid::now_v7();
                slot.insert(BuildSession {
                    flow,
                    record: BuildRecord::new(id.clone(), started_at),
                    phase: BuildPhase::Started,
                    generations: Vec::new(),
                    dependencies: Vec::new(),
                });
                self.metrics.lock().record_start();
                info!(build = %id, flow = %flow, "Build started");
                Ok(())
            }
        }
    }

    /// Buffer a produced artifact
    pub fn artifact_generated(
        &self,
        id: &BuildId,
        file_path: &str,
        fingerprint: Fingerprint,
    ) -> Result<(), IngestError> {
        if file_path.trim().is_empty() {
            return Err(IngestError::InvalidInput("file path must not be empty".to_string()));
        }
        let mut session = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| self.not_collecting(id, "artifact_generated"))?;
        let session = session.collecting();
        let record = GenerationRecord::new(
            fingerprint,
            id.clone(),
            session.record.started_at,
            file_path,
        );
        debug!(build = %id, flow = %session.flow, fingerprint = %record.fingerprint(), path = file_path, "Artifact generated");
        if !session.generations.contains(&record) {
            session.generations.push(record);
        }
        Ok(())
    }

    /// Buffer a resolved dependency
    pub fn dependency_resolved(
        &self,
        id: &BuildId,
        fingerprint: Fingerprint,
        scope: Scope,
    ) -> Result<(), IngestError> {
        let mut session = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| self.not_collecting(id, "dependency_resolved"))?;
        let session = session.collecting();
        debug!(build = %id, flow = %session.flow, fingerprint = %fingerprint, scope = %scope, "Dependency resolved");
        let record = DependencyRecord::new(id.clone(), fingerprint, scope);
        if !session.dependencies.contains(&record) {
            session.dependencies.push(record);
        }
        Ok(())
    }

    /// Finalize a build and persist its record set
    ///
    /// `on_commit` runs after the DAO confirms the write and before the
    /// build is reported `Committed`.
    pub fn complete<F>(
        &self,
        id: &BuildId,
        status: BuildStatus,
        completed_at: u64,
        on_commit: F,
    ) -> Result<CommitReceipt, IngestError>
    where
        F: FnOnce(&CommitReceipt),
    {
        if !status.is_terminal() {
            return Err(IngestError::InvalidInput(format!(
                "build cannot complete with status {}",
                status
            )));
        }
        let (_, mut session) = self
            .sessions
            .remove(id)
            .ok_or_else(|| self.not_collecting(id, "build_complete"))?;

        session.phase = BuildPhase::Finalizing;
        self.outcomes.insert(id.clone(), BuildPhase::Finalizing);
        debug!(build = %id, flow = %session.flow, "Build finalizing");

        let record = session.record.finalize(status, completed_at);
        match self.commit_with_retry(session.flow, &record, &session.generations, &session.dependencies) {
            Ok(receipt) => {
                on_commit(&receipt);
                self.settle(id, BuildPhase::Committed);
                self.metrics
                    .lock()
                    .record_commit(receipt.generations.len(), receipt.dependencies.len());
                info!(
                    build = %id,
                    flow = %session.flow,
                    status = %status,
                    generations = receipt.generations.len(),
                    dependencies = receipt.dependencies.len(),
                    "Build committed"
                );
                Ok(receipt)
            }
            Err(e) => {
                self.settle(id, BuildPhase::Failed);
                self.metrics.lock().record_failure();
                error!(build = %id, flow = %session.flow, error = %e, "Build provenance lost");
                Err(e)
            }
        }
    }

    fn commit_with_retry(
        &self,
        flow: Uuid,
        record: &BuildRecord,
        generations: &[GenerationRecord],
        dependencies: &[DependencyRecord],
    ) -> Result<CommitReceipt, IngestError> {
        let mut attempt = 0;
        loop {
            match self.dao.commit_build(record, generations, dependencies) {
                Ok(receipt) => return Ok(receipt),
                Err(e) if e.is_closed() => return Err(IngestError::DaoClosed),
                Err(e) if e.is_conflict() => return Err(IngestError::AlreadyCommitted(record.id.clone())),
                Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                    let delay = self.config.backoff(attempt);
                    attempt += 1;
                    warn!(
                        build = %record.id,
                        flow = %flow,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Commit failed, retrying"
                    );
                    self.metrics.lock().record_retry();
                    std::thread::sleep(delay);
                }
                Err(e) => {
                    return Err(IngestError::CommitFailed {
                        build: record.id.clone(),
                        attempts: attempt + 1,
                        source: Box::new(e),
                    })
                }
            }
        }
    }

    /// Discard a build's buffered records
    pub fn cancel(&self, id: &BuildId) -> Result<(), IngestError> {
        let (_, session) = self
            .sessions
            .remove(id)
            .ok_or_else(|| self.not_collecting(id, "cancel"))?;
        self.settle(id, BuildPhase::Failed);
        self.metrics.lock().record_cancel();
        info!(
            build = %id,
            flow = %session.flow,
            discarded_generations = session.generations.len(),
            discarded_dependencies = session.dependencies.len(),
            "Build cancelled"
        );
        Ok(())
    }

    /// Discard every open session, failing its build
    ///
    /// Returns the builds abandoned.
    pub fn abandon_all(&self) -> Vec<BuildId> {
        let mut abandoned = Vec::new();
        for id in self.in_flight() {
            let Some((_, session)) = self.sessions.remove(&id) else {
                continue;
            };
            self.settle(&id, BuildPhase::Failed);
            self.metrics.lock().record_failure();
            warn!(
                build = %id,
                flow = %session.flow,
                discarded_generations = session.generations.len(),
                discarded_dependencies = session.dependencies.len(),
                "Build abandoned"
            );
            abandoned.push(id);
        }
        abandoned
    }

    /// Record a terminal outcome, evicting the oldest beyond capacity
    fn settle(&self, id: &BuildId, phase: BuildPhase) {
        let previous = self.outcomes.insert(id.clone(), phase);
        if previous.is_some_and(|p| p.is_terminal()) {
            return;
        }
        let mut order = self.outcome_order.lock();
        order.push_back(id.clone());
        while order.len() > self.outcome_capacity {
            let Some(oldest) = order.pop_front() else {
                break;
            };
            self.outcomes.remove_if(&oldest, |_, phase| phase.is_terminal());
        }
    }

    fn is_persisted(&self, id: &BuildId) -> Result<bool, IngestError> {
        let record = self.dao.find_build(id).map_err(IngestError::from_dao)?;
        Ok(record.is_some_and(|r| r.status.is_terminal()))
    }

    fn not_collecting(&self, id: &BuildId, event: &'static str) -> IngestError {
        let known = self.outcomes.get(id).map(|phase| *phase);
        match known {
            Some(from) => IngestError::InvalidTransition {
                build: id.clone(),
                from,
                event,
            },
            None if matches!(self.is_persisted(id), Ok(true)) => IngestError::InvalidTransition {
                build: id.clone(),
                from: BuildPhase::Committed,
                event,
            },
            None => IngestError::UnknownBuild(id.clone()),
        }
    }

    /// Current phase of a build, if the pipeline or storage knows it
    pub fn state_of(&self, id: &BuildId) -> Option<BuildPhase> {
        if let Some(session) = self.sessions.get(id) {
            return Some(session.phase);
        }
        let known = self.outcomes.get(id).map(|phase| *phase);
        known.or_else(|| matches!(self.is_persisted(id), Ok(true)).then_some(BuildPhase::Committed))
    }

    /// Forget the outcome of builds removed from storage
    ///
    /// A forgotten build may be ingested again.
    pub fn forget<'a>(&self, ids: impl IntoIterator<Item = &'a BuildId>) {
        let mut order = self.outcome_order.lock();
        for id in ids {
            if self.outcomes.remove_if(id, |_, phase| phase.is_terminal()).is_some() {
                order.retain(|tracked| tracked != id);
            }
        }
    }

    /// Number of terminal outcomes held in memory
    pub fn recent_outcomes(&self) -> usize {
        self.outcomes.len()
    }

    /// Builds with an open session
    pub fn in_flight(&self) -> Vec<BuildId> {
        self.sessions.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Snapshot of the pipeline counters
    pub fn metrics(&self) -> IngestMetrics {
        self.metrics.lock().clone()
    }
}
