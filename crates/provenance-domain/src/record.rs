//! Generation and dependency records

use crate::{ArtifactFingerprint, BuildId, Fingerprint};
use std::fmt;

/// Maven dependency scope of a resolved artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Scope {
    /// Available on every classpath
    Compile,

    /// Supplied by the runtime container
    Provided,

    /// Needed only at runtime
    Runtime,

    /// Needed only by tests
    Test,

    /// Taken from an explicit local path
    System,

    /// Imported bill of materials
    Import,
}

impl Scope {
    /// Get the scope name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Compile => "compile",
            Scope::Provided => "provided",
            Scope::Runtime => "runtime",
            Scope::Test => "test",
            Scope::System => "system",
            Scope::Import => "import",
        }
    }

    /// Parse a scope from a string (case-insensitive)
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "compile" => Some(Scope::Compile),
            "provided" => Some(Scope::Provided),
            "runtime" => Some(Scope::Runtime),
            "test" => Some(Scope::Test),
            "system" => Some(Scope::System),
            "import" => Some(Scope::Import),
            _ => None,
        }
    }
}

impl std::str::FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("Invalid dependency scope: {}", s))
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A build produced a fingerprinted file
///
/// The first generation stored for a fingerprint is its canonical producer;
/// later ones are re-productions (the same content rebuilt) and stay queryable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRecord {
    /// Fingerprint and file name of the produced artifact
    pub artifact: ArtifactFingerprint,

    /// Producing build
    pub build: BuildId,

    /// Start time of the producing build (milliseconds since Unix epoch)
    pub build_started_at: u64,

    /// Path within the producing build's workspace
    pub file_path: String,

    /// Whether this is the first recorded producer of the fingerprint
    pub canonical: bool,
}

impl GenerationRecord {
    /// Create a (not yet canonicalized) generation record
    pub fn new(
        fingerprint: Fingerprint,
        build: BuildId,
        build_started_at: u64,
        file_path: impl Into<String>,
    ) -> Self {
        let file_path = file_path.into();
        Self {
            artifact: ArtifactFingerprint::from_path(fingerprint, &file_path),
            build,
            build_started_at,
            file_path,
            canonical: false,
        }
    }

    /// The produced fingerprint
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.artifact.fingerprint
    }
}

/// A build declared a dependency on a fingerprinted artifact
///
/// The edge resolves to a producer only when some [`GenerationRecord`] exists
/// for the fingerprint; otherwise the artifact is external to tracked builds.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DependencyRecord {
    /// Consuming build
    pub build: BuildId,

    /// Fingerprint of the consumed artifact
    pub fingerprint: Fingerprint,

    /// Dependency scope
    pub scope: Scope,
}

impl DependencyRecord {
    /// Create a dependency record
    pub fn new(build: BuildId, fingerprint: Fingerprint, scope: Scope) -> Self {
        Self {
            build,
            fingerprint,
            scope,
        }
    }
}

/// Whether an occurrence produced or consumed its fingerprint
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Role {
    /// The build generated the file
    Produced,

    /// The build depended on the artifact
    Consumed,
}

impl Role {
    /// Get the role name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Produced => "produced",
            Role::Consumed => "consumed",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One appearance of a fingerprint in a build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Occurrence {
    /// The fingerprint
    pub fingerprint: Fingerprint,

    /// Build where it appeared
    pub build: BuildId,

    /// Build start time, used to order occurrences
    pub timestamp: u64,

    /// Workspace path for produced files; consumed artifacts carry none
    pub file_path: Option<String>,

    /// Produced or consumed
    pub role: Role,
}

impl Occurrence {
    /// Occurrence of a generated file
    pub fn produced(record: &GenerationRecord) -> Self {
        Self {
            fingerprint: record.fingerprint().clone(),
            build: record.build.clone(),
            timestamp: record.build_started_at,
            file_path: Some(record.file_path.clone()),
            role: Role::Produced,
        }
    }

    /// Occurrence of a consumed dependency
    pub fn consumed(record: &DependencyRecord, build_started_at: u64) -> Self {
        Self {
            fingerprint: record.fingerprint.clone(),
            build: record.build.clone(),
            timestamp: build_started_at,
            file_path: None,
            role: Role::Consumed,
        }
    }
}
