//! Counters for ingestion and retention

/// Counters kept by the ingestion pipeline
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestMetrics {
    /// Builds started
    pub started: usize,

    /// Builds whose record set was committed
    pub committed: usize,

    /// Builds whose commit failed
    pub failed: usize,

    /// Builds cancelled before completion
    pub cancelled: usize,

    /// Commit retries after transient storage failures
    pub retries: usize,

    /// Generation records committed
    pub generations: usize,

    /// Dependency records committed
    pub dependencies: usize,
}

impl IngestMetrics {
    /// Create new empty metrics
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a build start
    pub fn record_start(&mut self) {
        self.started += 1;
    }

    /// Record a successful commit
    pub fn record_commit(&mut self, generations: usize, dependencies: usize) {
        self.committed += 1;
        self.generations += generations;
        self.dependencies += dependencies;
    }

    /// Record a failed commit
    pub fn record_failure(&mut self) {
        self.failed += 1;
    }

    /// Record a cancellation
    pub fn record_cancel(&mut self) {
        self.cancelled += 1;
    }

    /// Record one retry
    pub fn record_retry(&mut self) {
        self.retries += 1;
    }

    /// Builds started but not yet committed, failed or cancelled
    pub fn in_flight(&self) -> usize {
        self.started
            .saturating_sub(self.committed + self.failed + self.cancelled)
    }

    /// Generate a summary report of metrics
    pub fn summary(&self) -> String {
        [
            "Ingest Metrics Summary".to_string(),
            "======================".to_string(),
            format!("Builds started: {}", self.started),
            format!("Builds committed: {}", self.committed),
            format!("Builds failed: {}", self.failed),
            format!("Builds cancelled: {}", self.cancelled),
            format!("Commit retries: {}", self.retries),
            format!("Generations committed: {}", self.generations),
            format!("Dependencies committed: {}", self.dependencies),
        ]
        .join("\n")
    }
}

/// Counters kept across retention sweeps
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionMetrics {
    /// Sweeps completed
    pub sweep_count: usize,

    /// Builds deleted
    pub builds_deleted: usize,

    /// Builds a dry-run sweep would have deleted
    pub dry_run_candidates: usize,

    /// Total time spent sweeping (milliseconds)
    pub total_runtime_ms: u64,
}

impl RetentionMetrics {
    /// Create new empty metrics
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a sweep cycle completion
    pub fn record_sweep(&mut self, deleted: usize, candidates: usize, runtime_ms: u64) {
        self.sweep_count += 1;
        self.builds_deleted += deleted;
        self.dry_run_candidates += candidates;
        self.total_runtime_ms += runtime_ms;
    }

    /// Generate a summary report of metrics
    pub fn summary(&self) -> String {
        let mut lines = vec![
            "Retention Metrics Summary".to_string(),
            "=========================".to_string(),
            format!("Sweep cycles: {}", self.sweep_count),
            format!("Builds deleted: {}", self.builds_deleted),
        ];
        if self.dry_run_candidates > 0 {
            lines.push(format!("Dry-run candidates: {}", self.dry_run_candidates));
        }
        lines.push(format!("Total runtime: {}ms", self.total_runtime_ms));
        lines.join("\n")
    }
}
