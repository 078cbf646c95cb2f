//! Age-based deletion of persisted builds

use crate::{IngestError, ProvenanceEngine, RetentionConfig, RetentionMetrics};
use provenance_domain::{BuildId, ProvenanceDao};
use std::time::Instant;
use tracing::{debug, info};

/// Outcome of one sweep
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// Builds started before this time (ms since the epoch) were eligible
    pub cutoff: u64,

    /// Builds deleted, or the candidates when `dry_run` is set
    pub builds: Vec<BuildId>,

    /// Whether anything was actually deleted
    pub dry_run: bool,
}

/// Deletes finished builds older than the configured age
///
/// Running builds are never eligible. Deleting a canonical producer promotes
/// the next-oldest producer of the same artifact.
///
/// # Examples
///
/// ```no_run
/// use provenance_engine::{IngestConfig, ProvenanceEngine, Retention, RetentionConfig};
/// use provenance_store::SqliteDao;
/// use std::sync::Arc;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let dao = Arc::new(SqliteDao::open("provenance.db")?);
/// let engine = ProvenanceEngine::open(dao, IngestConfig::default())?;
/// let mut retention = Retention::new(RetentionConfig::default());
///
/// let report = retention.sweep_now(&engine)?;
/// println!("{} builds expired", report.builds.len());
/// # Ok(())
/// # }
/// ```
pub struct Retention {
    config: RetentionConfig,
    metrics: RetentionMetrics,
}

impl Retention {
    /// Create a retention sweeper with the given configuration
    pub fn new(config: RetentionConfig) -> Self {
        Self {
            config,
            metrics: RetentionMetrics::new(),
        }
    }

    /// Configuration in use
    pub fn config(&self) -> &RetentionConfig {
        &self.config
    }

    /// Get a reference to the current metrics
    pub fn metrics(&self) -> &RetentionMetrics {
        &self.metrics
    }

    /// Oldest start time that survives a sweep at `now_ms`
    pub fn cutoff(&self, now_ms: u64) -> u64 {
        let age_ms = u64::try_from(self.config.max_build_age().as_millis()).unwrap_or(u64::MAX);
        now_ms.saturating_sub(age_ms)
    }

    /// Sweep against the current time
    pub fn sweep_now<D: ProvenanceDao>(
        &mut self,
        engine: &ProvenanceEngine<D>,
    ) -> Result<SweepReport, IngestError> {
        self.sweep(engine, crate::now_millis())
    }

    /// Delete (or in dry-run mode, list) builds older than the cutoff
    pub fn sweep<D: ProvenanceDao>(
        &mut self,
        engine: &ProvenanceEngine<D>,
        now_ms: u64,
    ) -> Result<SweepReport, IngestError> {
        let start = Instant::now();
        let cutoff = self.cutoff(now_ms);
        debug!(cutoff, dry_run = self.config.dry_run, "Starting retention sweep");

        let report = if self.config.dry_run {
            let builds = engine.find_builds_before(cutoff)?;
            for id in &builds {
                info!(build = %id, "DRY RUN: would delete build");
            }
            self.metrics.record_sweep(0, builds.len(), elapsed_ms(start));
            SweepReport {
                cutoff,
                builds,
                dry_run: true,
            }
        } else {
            let builds = engine.delete_builds_before(cutoff)?;
            self.metrics.record_sweep(builds.len(), 0, elapsed_ms(start));
            SweepReport {
                cutoff,
                builds,
                dry_run: false,
            }
        };

        info!(
            cutoff,
            builds = report.builds.len(),
            dry_run = report.dry_run,
            "Retention sweep completed"
        );
        Ok(report)
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IngestConfig;
    use provenance_domain::BuildStatus;
    use provenance_store::SqliteDao;
    use std::sync::Arc;

    const DAY_MS: u64 = 24 * 3600 * 1000;

    fn engine_with_builds() -> ProvenanceEngine<SqliteDao> {
        let engine = ProvenanceEngine::open(
            Arc::new(SqliteDao::in_memory().unwrap()),
            IngestConfig::default(),
        )
        .unwrap();
        for (job, started_at) in [("job/old", DAY_MS), ("job/new", 40 * DAY_MS)] {
            engine.on_build_start_at(job, 1, started_at).unwrap();
            engine
                .on_artifact_generated(job, 1, "out.jar", if job == "job/old" { "aa" } else { "bb" })
                .unwrap();
            engine
                .on_build_complete_at(job, 1, BuildStatus::Success, started_at + 10)
                .unwrap();
        }
        engine
    }

    fn config(dry_run: bool) -> RetentionConfig {
        RetentionConfig {
            enabled: true,
            max_build_age_days: 30,
            dry_run,
            ..Default::default()
        }
    }

    #[test]
    fn test_cutoff() {
        let retention = Retention::new(config(false));
        assert_eq!(retention.cutoff(31 * DAY_MS), DAY_MS);
        assert_eq!(retention.cutoff(DAY_MS), 0);
    }

    #[test]
    fn test_sweep_deletes_expired_builds() {
        let engine = engine_with_builds();
        let mut retention = Retention::new(config(false));

        let report = retention.sweep(&engine, 45 * DAY_MS).unwrap();
        assert_eq!(report.builds, vec![BuildId::parse("job/old#1").unwrap()]);
        assert!(engine.query_fingerprint("aa").unwrap().is_empty());
        assert_eq!(engine.query_fingerprint("bb").unwrap().len(), 1);
        assert_eq!(retention.metrics().builds_deleted, 1);
    }

    #[test]
    fn test_dry_run_deletes_nothing() {
        let engine = engine_with_builds();
        let mut retention = Retention::new(config(true));

        let report = retention.sweep(&engine, 45 * DAY_MS).unwrap();
        assert!(report.dry_run);
        assert_eq!(report.builds.len(), 1);
        assert_eq!(engine.query_fingerprint("aa").unwrap().len(), 1);
        assert_eq!(retention.metrics().dry_run_candidates, 1);
        assert_eq!(retention.metrics().builds_deleted, 0);
    }
}
