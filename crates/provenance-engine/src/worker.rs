//! Background worker feeding host events into the engine

use crate::{BuildEvent, IngestError, ProvenanceEngine, Retention, RetentionConfig, RetentionMetrics};
use parking_lot::Mutex;
use provenance_domain::ProvenanceDao;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};

/// Totals reported when the worker stops
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerReport {
    /// Events accepted by the engine
    pub events_applied: usize,

    /// Builds committed
    pub builds_committed: usize,

    /// Events the engine rejected
    pub events_rejected: usize,

    /// Retention counters
    pub retention: RetentionMetrics,
}

/// Drives a [`ProvenanceEngine`] from a channel of [`BuildEvent`]s
///
/// Engine calls block on storage, so each one runs on the blocking pool.
/// When retention is enabled a sweep runs on every interval tick. The worker
/// stops when the channel closes or a shutdown signal arrives, and closes the
/// DAO on the way out.
///
/// # Examples
///
/// ```no_run
/// use provenance_engine::{BuildEvent, IngestConfig, ProvenanceEngine, ProvenanceWorker, RetentionConfig};
/// use provenance_store::SqliteDao;
/// use std::sync::Arc;
/// use tokio::sync::mpsc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let dao = Arc::new(SqliteDao::open("provenance.db")?);
///     let engine = Arc::new(ProvenanceEngine::open(dao, IngestConfig::default())?);
///     let (tx, rx) = mpsc::channel::<BuildEvent>(1024);
///     let mut worker = ProvenanceWorker::new(engine, RetentionConfig::default());
///
///     // Runs until the senders are dropped or Ctrl+C
///     drop(tx);
///     worker.run(rx).await?;
///     Ok(())
/// }
/// ```
pub struct ProvenanceWorker<D: ProvenanceDao + 'static> {
    engine: Arc<ProvenanceEngine<D>>,
    retention: Arc<Mutex<Retention>>,
    report: WorkerReport,
}

impl<D: ProvenanceDao + 'static> ProvenanceWorker<D> {
    /// Create a worker for the given engine
    pub fn new(engine: Arc<ProvenanceEngine<D>>, retention: RetentionConfig) -> Self {
        Self {
            engine,
            retention: Arc::new(Mutex::new(Retention::new(retention))),
            report: WorkerReport::default(),
        }
    }

    /// Totals so far
    pub fn report(&self) -> WorkerReport {
        let mut report = self.report.clone();
        report.retention = self.retention.lock().metrics().clone();
        report
    }

    /// Run until the channel closes or Ctrl+C
    pub async fn run(&mut self, events: mpsc::Receiver<BuildEvent>) -> Result<WorkerReport, IngestError> {
        self.run_until(events, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!("Cannot listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Run until the channel closes or `shutdown` resolves
    pub async fn run_until<F>(
        &mut self,
        mut events: mpsc::Receiver<BuildEvent>,
        shutdown: F,
    ) -> Result<WorkerReport, IngestError>
    where
        F: Future<Output = ()>,
    {
        let (sweeping, period) = {
            let retention = self.retention.lock();
            (retention.config().enabled, retention.config().sweep_interval())
        };
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        tracing::info!(
            "Provenance worker started (retention: {}, interval: {:?})",
            if sweeping { "on" } else { "off" },
            period
        );

        loop {
            tokio::select! {
                received = events.recv() => match received {
                    Some(event) => self.dispatch(event).await?,
                    None => {
                        tracing::info!("Event channel closed, stopping worker");
                        break;
                    }
                },
                _ = ticker.tick(), if sweeping => {
                    self.sweep().await?;
                }
                _ = &mut shutdown => {
                    tracing::info!("Shutdown signal received, stopping worker");
                    break;
                }
            }
        }

        let engine = Arc::clone(&self.engine);
        tokio::task::spawn_blocking(move || engine.close())
            .await
            .map_err(|e| IngestError::Worker(e.to_string()))??;

        let report = self.report();
        tracing::info!(
            "Provenance worker stopped: {} events applied, {} builds committed, {} rejected\n{}",
            report.events_applied,
            report.builds_committed,
            report.events_rejected,
            report.retention.summary()
        );
        Ok(report)
    }

    async fn dispatch(&mut self, event: BuildEvent) -> Result<(), IngestError> {
        let kind = event.kind();
        let (job, number) = event.build();
        let build = format!("{}#{}", job, number);
        let engine = Arc::clone(&self.engine);

        let outcome = tokio::task::spawn_blocking(move || engine.apply_event(event))
            .await
            .map_err(|e| IngestError::Worker(e.to_string()))?;

        match outcome {
            Ok(receipt) => {
                self.report.events_applied += 1;
                if receipt.is_some() {
                    self.report.builds_committed += 1;
                }
            }
            // Nothing more can be stored
            Err(IngestError::DaoClosed) => return Err(IngestError::DaoClosed),
            Err(e) => {
                self.report.events_rejected += 1;
                tracing::warn!("Rejected {} for {}: {}", kind, build, e);
            }
        }
        Ok(())
    }

    async fn sweep(&mut self) -> Result<(), IngestError> {
        let engine = Arc::clone(&self.engine);
        let retention = Arc::clone(&self.retention);

        let outcome = tokio::task::spawn_blocking(move || {
            let mut retention = retention.lock();
            retention.sweep_now(&engine)
        })
        .await
        .map_err(|e| IngestError::Worker(e.to_string()))?;

        match outcome {
            Ok(report) => {
                tracing::debug!("Sweep removed {} builds", report.builds.len());
                Ok(())
            }
            Err(IngestError::DaoClosed) => Err(IngestError::DaoClosed),
            Err(e) => {
                tracing::error!("Sweep failed: {}", e);
                Ok(())
            }
        }
    }
}
