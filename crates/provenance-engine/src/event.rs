//! Serialized host events
//!
//! One JSON object per line, tagged by `event`:
//!
//! ```json
//! {"event":"build_started","job":"job/web","number":12}
//! {"event":"artifact_generated","job":"job/web","number":12,"file_path":"target/app.jar","checksum":"abc123"}
//! {"event":"dependency_resolved","job":"job/service","number":5,"checksum":"abc123","scope":"compile"}
//! {"event":"build_completed","job":"job/web","number":12,"status":"success"}
//! ```

use crate::IngestError;
use serde::{Deserialize, Serialize};
use std::io::BufRead;

/// A host callback in serialized form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BuildEvent {
    /// A build began
    BuildStarted {
        /// Job path
        job: String,
        /// Build number
        number: u32,
        /// Start time in milliseconds since the epoch; now when absent
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// A build wrote a fingerprinted artifact
    ArtifactGenerated {
        /// Job path
        job: String,
        /// Build number
        number: u32,
        /// Path of the produced file
        file_path: String,
        /// Hex checksum of the file
        checksum: String,
    },

    /// A build resolved a dependency
    DependencyResolved {
        /// Job path
        job: String,
        /// Build number
        number: u32,
        /// Hex checksum of the resolved artifact
        checksum: String,
        /// Maven scope
        #[serde(default = "default_scope")]
        scope: String,
    },

    /// A build finished
    BuildCompleted {
        /// Job path
        job: String,
        /// Build number
        number: u32,
        /// Host-reported status
        status: String,
        /// Completion time in milliseconds since the epoch; now when absent
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// A build was abandoned before completion
    BuildCancelled {
        /// Job path
        job: String,
        /// Build number
        number: u32,
    },
}

fn default_scope() -> String {
    "compile".to_string()
}

impl BuildEvent {
    /// Job path and build number the event refers to
    pub fn build(&self) -> (&str, u32) {
        match self {
            BuildEvent::BuildStarted { job, number, .. }
            | BuildEvent::ArtifactGenerated { job, number, .. }
            | BuildEvent::DependencyResolved { job, number, .. }
            | BuildEvent::BuildCompleted { job, number, .. }
            | BuildEvent::BuildCancelled { job, number } => (job, *number),
        }
    }

    /// Event name as written in the `event` tag
    pub fn kind(&self) -> &'static str {
        match self {
            BuildEvent::BuildStarted { .. } => "build_started",
            BuildEvent::ArtifactGenerated { .. } => "artifact_generated",
            BuildEvent::DependencyResolved { .. } => "dependency_resolved",
            BuildEvent::BuildCompleted { .. } => "build_completed",
            BuildEvent::BuildCancelled { .. } => "build_cancelled",
        }
    }

    /// Parse a single JSON line
    pub fn from_json(line: &str) -> Result<Self, IngestError> {
        serde_json::from_str(line).map_err(|e| IngestError::InvalidInput(e.to_string()))
    }

    /// Encode as a single JSON line
    pub fn to_json(&self) -> Result<String, IngestError> {
        serde_json::to_string(self).map_err(|e| IngestError::InvalidInput(e.to_string()))
    }
}

/// Read JSON Lines events, skipping blank lines and `#` comments
///
/// Errors carry the one-based line number.
pub fn read_events<R: BufRead>(reader: R) -> Result<Vec<BuildEvent>, IngestError> {
    let mut events = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let event = BuildEvent::from_json(trimmed).map_err(|e| {
            IngestError::InvalidInput(format!("line {}: {}", index + 1, e))
        })?;
        events.push(event);
    }
    Ok(events)
}
