//! Content fingerprints
//!
//! A fingerprint is the checksum of a file's content. It is the identity of an
//! artifact: the same checksum always denotes the same logical content no matter
//! which build produced it.

use std::fmt;

/// Longest checksum accepted (a hex-encoded 512-bit digest)
pub const MAX_FINGERPRINT_LEN: usize = 128;

/// A normalized (lower-case hexadecimal) content checksum
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Validate and normalize a checksum
    ///
    /// # Examples
    ///
    /// ```
    /// use provenance_domain::Fingerprint;
    ///
    /// let fp = Fingerprint::new("ABC123").unwrap();
    /// assert_eq!(fp.as_str(), "abc123");
    /// assert!(Fingerprint::new("not-hex").is_err());
    /// ```
    pub fn new(checksum: &str) -> Result<Self, String> {
        let trimmed = checksum.trim();
        if trimmed.is_empty() {
            return Err("Fingerprint must not be empty".to_string());
        }
        if trimmed.len() > MAX_FINGERPRINT_LEN {
            return Err(format!(
                "Fingerprint is {} characters, longer than {}",
                trimmed.len(),
                MAX_FINGERPRINT_LEN
            ));
        }
        if !trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(format!("Fingerprint '{}' is not hexadecimal", trimmed));
        }
        Ok(Self(trimmed.to_ascii_lowercase()))
    }

    /// The normalized checksum
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight characters, for compact display
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(8)]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Fingerprint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// A fingerprint together with the name of the file it was taken from
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArtifactFingerprint {
    /// Content checksum
    pub fingerprint: Fingerprint,

    /// File name (last path component)
    pub file_name: String,
}

impl ArtifactFingerprint {
    /// Create an artifact fingerprint
    pub fn new(fingerprint: Fingerprint, file_name: impl Into<String>) -> Self {
        Self {
            fingerprint,
            file_name: file_name.into(),
        }
    }

    /// Derive the file name from a workspace path
    ///
    /// # Examples
    ///
    /// ```
    /// use provenance_domain::{ArtifactFingerprint, Fingerprint};
    ///
    /// let fp = Fingerprint::new("abc123").unwrap();
    /// let artifact = ArtifactFingerprint::from_path(fp, "target/app.jar");
    /// assert_eq!(artifact.file_name, "app.jar");
    /// ```
    pub fn from_path(fingerprint: Fingerprint, file_path: &str) -> Self {
        let file_name = file_path
            .rsplit(['/', '\\'])
            .find(|part| !part.is_empty())
            .unwrap_or(file_path);
        Self::new(fingerprint, file_name)
    }
}

impl fmt::Display for ArtifactFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.file_name, self.fingerprint)
    }
}
