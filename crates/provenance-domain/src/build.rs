//! Build identity and lifecycle records

use std::fmt;

/// Identifier of a single build: a hierarchical job path plus a build number
///
/// Rendered as `job/path#number`, e.g. `job/web#12`. Ordering is by job path
/// first, then by build number, so builds of the same job sort chronologically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BuildId {
    job: String,
    number: u32,
}

impl BuildId {
    /// Create a build identifier, validating the job path
    ///
    /// # Examples
    ///
    /// ```
    /// use provenance_domain::BuildId;
    ///
    /// let id = BuildId::new("job/web", 12).unwrap();
    /// assert_eq!(id.to_string(), "job/web#12");
    /// assert!(BuildId::new("job//web", 1).is_err());
    /// ```
    pub fn new(job: impl Into<String>, number: u32) -> Result<Self, String> {
        let job = job.into();
        validate_job_path(&job)?;
        Ok(Self { job, number })
    }

    /// Parse a build identifier from its `job#number` form
    ///
    /// # Examples
    ///
    /// ```
    /// use provenance_domain::BuildId;
    ///
    /// let id = BuildId::parse("folder/job/service#5").unwrap();
    /// assert_eq!(id.job(), "folder/job/service");
    /// assert_eq!(id.number(), 5);
    /// ```
    pub fn parse(s: &str) -> Result<Self, String> {
        let (job, number) = s
            .rsplit_once('#')
            .ok_or_else(|| format!("Invalid build id '{}': expected <job>#<number>", s))?;
        let number = number
            .parse::<u32>()
            .map_err(|e| format!("Invalid build number in '{}': {}", s, e))?;
        Self::new(job, number)
    }

    /// The job path
    pub fn job(&self) -> &str {
        &self.job
    }

    /// The build number
    pub fn number(&self) -> u32 {
        self.number
    }

    /// Same build number under a different job path
    pub fn with_job(&self, job: impl Into<String>) -> Result<Self, String> {
        Self::new(job, self.number)
    }
}

impl fmt::Display for BuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.job, self.number)
    }
}

impl std::str::FromStr for BuildId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Validate a hierarchical job path (`folder/sub/job`)
pub fn validate_job_path(job: &str) -> Result<(), String> {
    if job.is_empty() {
        return Err("Job path must not be empty".to_string());
    }
    if job.contains('#') {
        return Err(format!("Job path '{}' must not contain '#'", job));
    }
    if job.split('/').any(|segment| segment.trim().is_empty()) {
        return Err(format!("Job path '{}' has an empty segment", job));
    }
    Ok(())
}

/// Terminal status reported by the host for a build
///
/// `Running` is the only non-terminal value; it is held while the build is
/// still collecting events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuildStatus {
    /// Build is still executing
    Running,

    /// Build finished successfully
    Success,

    /// Build finished with test failures or warnings
    Unstable,

    /// Build failed
    Failure,

    /// Build was aborted by a user or the host
    Aborted,

    /// Build was skipped
    NotBuilt,
}

impl BuildStatus {
    /// Get the status name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStatus::Running => "running",
            BuildStatus::Success => "success",
            BuildStatus::Unstable => "unstable",
            BuildStatus::Failure => "failure",
            BuildStatus::Aborted => "aborted",
            BuildStatus::NotBuilt => "not_built",
        }
    }

    /// Parse a status from a string (case-insensitive)
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "running" => Some(BuildStatus::Running),
            "success" => Some(BuildStatus::Success),
            "unstable" => Some(BuildStatus::Unstable),
            "failure" | "failed" => Some(BuildStatus::Failure),
            "aborted" => Some(BuildStatus::Aborted),
            "not_built" | "not-built" => Some(BuildStatus::NotBuilt),
            _ => None,
        }
    }

    /// Whether the host has finished with the build
    pub fn is_terminal(&self) -> bool {
        !matches!(self, BuildStatus::Running)
    }
}

impl std::str::FromStr for BuildStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("Invalid build status: {}", s))
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One execution of a job
///
/// Created at build start and finalized once at completion. After
/// finalization the record is never modified, only deleted by retention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRecord {
    /// Build identity
    pub id: BuildId,

    /// Start time (milliseconds since Unix epoch)
    pub started_at: u64,

    /// Wall-clock duration once finalized
    pub duration_ms: Option<u64>,

    /// Host-reported status
    pub status: BuildStatus,
}

impl BuildRecord {
    /// Create a running build record
    pub fn new(id: BuildId, started_at: u64) -> Self {
        Self {
            id,
            started_at,
            duration_ms: None,
            status: BuildStatus::Running,
        }
    }

    /// Finalize the record with the host status and completion time
    pub fn finalize(mut self, status: BuildStatus, completed_at: u64) -> Self {
        self.status = status;
        self.duration_ms = Some(completed_at.saturating_sub(self.started_at));
        self
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Property: any valid id survives a trip through its string form
        #[test]
        fn test_build_id_string_roundtrip(
            segments in prop::collection::vec("[a-z][a-z0-9_.-]{0,8}", 1..4),
            number: u32,
        ) {
            let id = BuildId::new(segments.join("/"), number).unwrap();
            let parsed = BuildId::parse(&id.to_string());
            prop_assert_eq!(parsed, Ok(id));
        }
    }
}
