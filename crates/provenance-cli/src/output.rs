//! Output formatting for the CLI.

use crate::config::OutputFormat;
use crate::error::Result;
use colored::*;
use provenance_domain::{BuildId, Fingerprint, Occurrence};
use provenance_engine::{EngineStats, SweepReport};
use std::collections::BTreeSet;
use std::path::PathBuf;
use tabled::{
    builder::Builder,
    settings::{object::Rows, Alignment, Modify, Style},
};

/// Output formatter.
pub struct Formatter {
    format: OutputFormat,
    color_enabled: bool,
}

impl Formatter {
    /// Create a new formatter.
    pub fn new(format: OutputFormat, color_enabled: bool) -> Self {
        Self {
            format,
            color_enabled,
        }
    }

    /// Selected output format.
    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Format the occurrences of one artifact.
    pub fn format_occurrences(&self, occurrences: &[Occurrence]) -> Result<String> {
        match self.format {
            OutputFormat::Json => {
                let rows: Vec<serde_json::Value> = occurrences
                    .iter()
                    .map(|o| {
                        serde_json::json!({
                            "fingerprint": o.fingerprint.as_str(),
                            "build": o.build.to_string(),
                            "job": o.build.job(),
                            "number": o.build.number(),
                            "role": o.role.as_str(),
                            "timestamp": o.timestamp,
                            "file_path": o.file_path,
                        })
                    })
                    .collect();
                Ok(serde_json::to_string_pretty(&rows)?)
            }
            OutputFormat::Quiet => Ok(occurrences
                .iter()
                .map(|o| o.build.to_string())
                .collect::<Vec<_>>()
                .join("\n")),
            OutputFormat::Table => {
                if occurrences.is_empty() {
                    return Ok(self.colorize("No builds found for this fingerprint.", "yellow"));
                }
                let rows = occurrences.iter().map(|o| {
                    vec![
                        o.role.to_string(),
                        o.build.to_string(),
                        o.timestamp.to_string(),
                        o.file_path.clone().unwrap_or_else(|| "-".to_string()),
                    ]
                });
                Ok(self.table(["Role", "Build", "Started (ms)", "File"], rows))
            }
        }
    }

    /// Format a set of builds.
    pub fn format_builds(&self, builds: &BTreeSet<BuildId>) -> Result<String> {
        match self.format {
            OutputFormat::Json => {
                let ids: Vec<String> = builds.iter().map(ToString::to_string).collect();
                Ok(serde_json::to_string_pretty(&ids)?)
            }
            OutputFormat::Quiet => Ok(builds
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("\n")),
            OutputFormat::Table => {
                if builds.is_empty() {
                    return Ok(self.colorize("No builds found.", "yellow"));
                }
                let rows = builds
                    .iter()
                    .map(|b| vec![b.job().to_string(), b.number().to_string()]);
                Ok(self.table(["Job", "Build"], rows))
            }
        }
    }

    /// Format a set of fingerprints.
    pub fn format_fingerprints(&self, fingerprints: &BTreeSet<Fingerprint>) -> Result<String> {
        match self.format {
            OutputFormat::Json => {
                let values: Vec<&str> = fingerprints.iter().map(Fingerprint::as_str).collect();
                Ok(serde_json::to_string_pretty(&values)?)
            }
            OutputFormat::Quiet => Ok(fingerprints
                .iter()
                .map(Fingerprint::as_str)
                .collect::<Vec<_>>()
                .join("\n")),
            OutputFormat::Table => {
                if fingerprints.is_empty() {
                    return Ok(self.colorize("No dependencies recorded.", "yellow"));
                }
                let rows = fingerprints.iter().map(|f| vec![f.to_string()]);
                Ok(self.table(["Fingerprint"], rows))
            }
        }
    }

    /// Format file fingerprints.
    pub fn format_hashes(&self, hashes: &[(PathBuf, Fingerprint)]) -> Result<String> {
        match self.format {
            OutputFormat::Json => {
                let rows: Vec<serde_json::Value> = hashes
                    .iter()
                    .map(|(path, fingerprint)| {
                        serde_json::json!({
                            "file": path.display().to_string(),
                            "sha256": fingerprint.as_str(),
                        })
                    })
                    .collect();
                Ok(serde_json::to_string_pretty(&rows)?)
            }
            OutputFormat::Quiet => Ok(hashes
                .iter()
                .map(|(_, fingerprint)| fingerprint.as_str())
                .collect::<Vec<_>>()
                .join("\n")),
            OutputFormat::Table => {
                let rows = hashes
                    .iter()
                    .map(|(path, fingerprint)| vec![fingerprint.to_string(), path.display().to_string()]);
                Ok(self.table(["SHA-256", "File"], rows))
            }
        }
    }

    /// Format storage and index counts.
    pub fn format_stats(&self, stats: &EngineStats) -> Result<String> {
        match self.format {
            OutputFormat::Json => Ok(serde_json::to_string_pretty(&serde_json::json!({
                "builds": stats.stored.builds,
                "generations": stats.stored.generations,
                "dependencies": stats.stored.dependencies,
                "fingerprints": stats.stored.fingerprints,
                "external_dependencies": stats.stored.external_dependencies,
                "indexed_fingerprints": stats.indexed_fingerprints,
                "indexed_consumers": stats.indexed_consumers,
            }))?),
            OutputFormat::Quiet => Ok(stats.stored.builds.to_string()),
            OutputFormat::Table => {
                let rows = [
                    ("Builds", stats.stored.builds),
                    ("Generation records", stats.stored.generations),
                    ("Dependency records", stats.stored.dependencies),
                    ("Produced fingerprints", stats.stored.fingerprints),
                    ("External dependencies", stats.stored.external_dependencies),
                    ("Indexed fingerprints", stats.indexed_fingerprints),
                    ("Indexed consumers", stats.indexed_consumers),
                ]
                .into_iter()
                .map(|(name, count)| vec![name.to_string(), count.to_string()]);
                Ok(self.table(["Metric", "Count"], rows))
            }
        }
    }

    /// Format the outcome of a retention sweep.
    pub fn format_sweep(&self, report: &SweepReport) -> Result<String> {
        match self.format {
            OutputFormat::Json => {
                let builds: Vec<String> = report.builds.iter().map(ToString::to_string).collect();
                Ok(serde_json::to_string_pretty(&serde_json::json!({
                    "cutoff": report.cutoff,
                    "dry_run": report.dry_run,
                    "builds": builds,
                }))?)
            }
            OutputFormat::Quiet => Ok(report
                .builds
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("\n")),
            OutputFormat::Table => {
                let verb = if report.dry_run { "Would delete" } else { "Deleted" };
                let mut lines = vec![self.success(&format!("{} {} build(s)", verb, report.builds.len()))];
                lines.extend(report.builds.iter().map(|b| format!("  - {}", b)));
                Ok(lines.join("\n"))
            }
        }
    }

    fn table<const N: usize>(
        &self,
        header: [&str; N],
        rows: impl Iterator<Item = Vec<String>>,
    ) -> String {
        let mut builder = Builder::default();
        builder.push_record(header);
        for row in rows {
            builder.push_record(row);
        }

        let mut table = builder.build();
        table
            .with(Style::rounded())
            .with(Modify::new(Rows::first()).with(Alignment::center()));
        table.to_string()
    }

    /// Format a success message.
    pub fn success(&self, message: &str) -> String {
        self.colorize(&format!("✓ {}", message), "green")
    }

    /// Format an error message.
    pub fn error(&self, message: &str) -> String {
        self.colorize(&format!("✗ {}", message), "red")
    }

    /// Format an info message.
    pub fn info(&self, message: &str) -> String {
        self.colorize(&format!("ℹ {}", message), "blue")
    }

    /// Format a warning message.
    pub fn warning(&self, message: &str) -> String {
        self.colorize(&format!("⚠ {}", message), "yellow")
    }

    /// Colorize text if color is enabled.
    fn colorize(&self, text: &str, color: &str) -> String {
        if !self.color_enabled {
            return text.to_string();
        }

        match color {
            "red" => text.red().to_string(),
            "green" => text.green().to_string(),
            "blue" => text.blue().to_string(),
            "yellow" => text.yellow().to_string(),
            _ => text.to_string(),
        }
    }
}
