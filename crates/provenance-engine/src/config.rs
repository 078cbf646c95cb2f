//! Configuration for ingestion and retention
//!
//! Defines commit retry policy, retention windows and the database location.

use crate::IngestError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Retry policy for build commits
///
/// Transient storage failures are retried with exponential backoff:
/// `initial_backoff_ms * backoff_multiplier^attempt`, capped at `max_backoff_ms`.
///
/// # Examples
///
/// ```
/// use provenance_engine::IngestConfig;
/// use std::time::Duration;
///
/// let config = IngestConfig::default();
/// assert_eq!(config.max_retries, 3);
/// assert_eq!(config.backoff(0), Duration::from_millis(50));
/// assert_eq!(config.backoff(1), Duration::from_millis(100));
///
/// let config = IngestConfig::no_retry();
/// assert_eq!(config.max_retries, 0);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Retries after the first failed attempt
    /// Default: 3
    pub max_retries: u32,

    /// Delay before the first retry (milliseconds)
    /// Default: 50
    pub initial_backoff_ms: u64,

    /// Upper bound on any single delay (milliseconds)
    /// Default: 2000
    pub max_backoff_ms: u64,

    /// Growth factor between consecutive delays
    /// Default: 2
    pub backoff_multiplier: u32,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 50,
            max_backoff_ms: 2_000,
            backoff_multiplier: 2,
        }
    }
}

impl IngestConfig {
    /// More retries with longer waits, for busy shared databases
    ///
    /// - Retries: 8
    /// - Initial backoff: 100 ms
    /// - Cap: 10 s
    pub fn patient() -> Self {
        Self {
            max_retries: 8,
            initial_backoff_ms: 100,
            max_backoff_ms: 10_000,
            backoff_multiplier: 2,
        }
    }

    /// Fail on the first storage error
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (zero-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = u64::from(self.backoff_multiplier.max(1))
            .checked_pow(attempt)
            .unwrap_or(u64::MAX);
        let millis = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(millis)
    }

    /// Total attempts including the first
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Age-based cleanup of persisted builds
///
/// Disabled unless explicitly enabled; finished builds older than
/// `max_build_age_days` are deleted on each sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Run sweeps at all
    /// Default: false
    pub enabled: bool,

    /// Builds started longer ago than this are expired (in days)
    /// Default: 90 days
    pub max_build_age_days: u64,

    /// How often to sweep (in minutes)
    /// Default: every 60 minutes
    pub sweep_interval_minutes: u64,

    /// Log what would be deleted without deleting
    /// Default: false
    pub dry_run: bool,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_build_age_days: 90,
            sweep_interval_minutes: 60,
            dry_run: false,
        }
    }
}

impl RetentionConfig {
    /// Get sweep interval as Duration
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_minutes.max(1).saturating_mul(60))
    }

    /// Get max build age as Duration
    pub fn max_build_age(&self) -> Duration {
        Duration::from_secs(self.max_build_age_days.saturating_mul(24 * 3600))
    }
}

/// Top-level engine configuration
///
/// Loaded from TOML:
///
/// ```toml
/// database_path = "provenance.db"
/// log_filter = "info"
///
/// [ingest]
/// max_retries = 3
/// initial_backoff_ms = 50
///
/// [retention]
/// enabled = true
/// max_build_age_days = 30
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// SQLite database file
    pub database_path: PathBuf,

    /// Default tracing filter when `RUST_LOG` is unset
    pub log_filter: String,

    /// Commit retry policy
    pub ingest: IngestConfig,

    /// Retention policy
    pub retention: RetentionConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("provenance.db"),
            log_filter: "info".to_string(),
            ingest: IngestConfig::default(),
            retention: RetentionConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, IngestError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            IngestError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&contents)
            .map_err(|e| IngestError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self, IngestError> {
        let config: Self = toml::from_str(contents)
            .map_err(|e| IngestError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.database_path.as_os_str().is_empty() {
            return Err(IngestError::Config("database_path must not be empty".to_string()));
        }
        if self.ingest.backoff_multiplier == 0 {
            return Err(IngestError::Config(
                "ingest.backoff_multiplier must be at least 1".to_string(),
            ));
        }
        if self.ingest.initial_backoff_ms > self.ingest.max_backoff_ms {
            return Err(IngestError::Config(
                "ingest.initial_backoff_ms exceeds ingest.max_backoff_ms".to_string(),
            ));
        }
        if self.retention.sweep_interval_minutes == 0 {
            return Err(IngestError::Config(
                "retention.sweep_interval_minutes must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
