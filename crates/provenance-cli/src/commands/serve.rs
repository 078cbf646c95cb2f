//! Serve command implementation.

use super::Engine;
use crate::error::{CliError, Result};
use crate::output::Formatter;
use provenance_engine::{BuildEvent, ProvenanceWorker, RetentionConfig};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

const CHANNEL_CAPACITY: usize = 1024;

/// Execute the serve command.
///
/// Reads JSON Lines events from stdin until EOF or Ctrl+C. Malformed lines
/// are logged and skipped.
pub async fn execute_serve(
    engine: Arc<Engine>,
    retention: RetentionConfig,
    formatter: &Formatter,
) -> Result<()> {
    let (tx, rx) = mpsc::channel::<BuildEvent>(CHANNEL_CAPACITY);

    let reader = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut number = 0usize;
        while let Some(line) = lines.next_line().await? {
            number += 1;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            match BuildEvent::from_json(trimmed) {
                Ok(event) => {
                    if tx.send(event).await.is_err() {
                        // Worker stopped
                        break;
                    }
                }
                Err(e) => tracing::warn!("Skipping line {}: {}", number, e),
            }
        }
        Ok::<usize, std::io::Error>(number)
    });

    let mut worker = ProvenanceWorker::new(engine, retention);
    let report = worker.run(rx).await?;
    reader.abort();

    println!(
        "{}",
        formatter.success(&format!(
            "Applied {} event(s), committed {} build(s), rejected {}",
            report.events_applied, report.builds_committed, report.events_rejected
        ))
    );
    if report.retention.sweep_count > 0 {
        println!("{}", formatter.info(&report.retention.summary()));
    }
    if report.events_rejected > 0 {
        return Err(CliError::Rejected {
            rejected: report.events_rejected,
            total: report.events_applied + report.events_rejected,
        });
    }
    Ok(())
}
