//! Replay command implementation.

use super::Engine;
use crate::cli::ReplayArgs;
use crate::error::{CliError, Result};
use crate::output::Formatter;
use provenance_engine::{read_events, BuildEvent};
use std::fs::File;
use std::io::BufReader;

/// Counts from one replay.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    /// Events read
    pub total: usize,
    /// Events accepted
    pub applied: usize,
    /// Builds committed
    pub committed: usize,
    /// Events rejected
    pub rejected: usize,
}

/// Apply events in order.
///
/// Without `keep_going` the first rejected event aborts the replay.
pub fn replay_events(engine: &Engine, events: Vec<BuildEvent>, keep_going: bool) -> Result<ReplaySummary> {
    let mut summary = ReplaySummary {
        total: events.len(),
        ..Default::default()
    };
    for (index, event) in events.into_iter().enumerate() {
        let kind = event.kind();
        match engine.apply_event(event) {
            Ok(receipt) => {
                summary.applied += 1;
                if receipt.is_some() {
                    summary.committed += 1;
                }
            }
            Err(e) if keep_going => {
                summary.rejected += 1;
                tracing::warn!("Event {} ({}) rejected: {}", index + 1, kind, e);
            }
            Err(e) => {
                return Err(CliError::InvalidInput(format!(
                    "event {} ({}) rejected: {}",
                    index + 1,
                    kind,
                    e
                )))
            }
        }
    }
    Ok(summary)
}

/// Execute the replay command.
pub fn execute_replay(args: ReplayArgs, engine: &Engine, formatter: &Formatter) -> Result<()> {
    let events = read_events(BufReader::new(File::open(&args.file)?))?;
    let summary = replay_events(engine, events, args.keep_going)?;

    println!(
        "{}",
        formatter.success(&format!(
            "Replayed {} event(s): {} build(s) committed",
            summary.applied, summary.committed
        ))
    );
    if summary.rejected > 0 {
        return Err(CliError::Rejected {
            rejected: summary.rejected,
            total: summary.total,
        });
    }
    Ok(())
}
