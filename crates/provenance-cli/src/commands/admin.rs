//! Maintenance commands: deletion, renaming, retention and statistics.

use super::{parse_build, Engine};
use crate::cli::CleanupArgs;
use crate::error::{CliError, Result};
use crate::output::Formatter;
use provenance_engine::{Retention, RetentionConfig};
use std::io::{self, Write};

/// Ask for confirmation on stdin.
fn confirm(prompt: &str) -> Result<bool> {
    print!("{} [y/N] ", prompt);
    io::stdout().flush()?;

    let mut response = String::new();
    io::stdin().read_line(&mut response)?;
    Ok(response.trim().eq_ignore_ascii_case("y"))
}

/// Execute the delete-build command.
pub fn execute_delete_build(build: &str, yes: bool, engine: &Engine, formatter: &Formatter) -> Result<()> {
    let id = parse_build(build)?;
    if !yes && !confirm(&format!("Delete build {} and its records?", id))? {
        println!("{}", formatter.info("Operation cancelled"));
        return Ok(());
    }

    if engine.delete_build(id.job(), id.number())? {
        println!("{}", formatter.success(&format!("Deleted build {}", id)));
    } else {
        println!("{}", formatter.warning(&format!("Build {} not found", id)));
    }
    Ok(())
}

/// Execute the delete-job command.
pub fn execute_delete_job(job: &str, yes: bool, engine: &Engine, formatter: &Formatter) -> Result<()> {
    provenance_domain::validate_job_path(job).map_err(CliError::InvalidInput)?;
    if !yes && !confirm(&format!("Delete every build of {} and nested jobs?", job))? {
        println!("{}", formatter.info("Operation cancelled"));
        return Ok(());
    }

    let deleted = engine.delete_job(job)?;
    println!("{}", formatter.success(&format!("Deleted {} build(s)", deleted)));
    Ok(())
}

/// Execute the rename-job command.
pub fn execute_rename_job(from: &str, to: &str, engine: &Engine, formatter: &Formatter) -> Result<()> {
    let moved = engine.rename_job(from, to)?;
    if moved == 0 {
        println!("{}", formatter.warning(&format!("No builds found for {}", from)));
    } else {
        println!(
            "{}",
            formatter.success(&format!("Moved {} build(s) from {} to {}", moved, from, to))
        );
    }
    Ok(())
}

/// Retention settings for a manual cleanup run.
pub fn cleanup_config(args: &CleanupArgs, configured: &RetentionConfig) -> RetentionConfig {
    RetentionConfig {
        enabled: true,
        max_build_age_days: args.days.unwrap_or(configured.max_build_age_days),
        dry_run: args.dry_run || configured.dry_run,
        ..configured.clone()
    }
}

/// Execute the cleanup command.
pub fn execute_cleanup(
    args: CleanupArgs,
    configured: &RetentionConfig,
    engine: &Engine,
    formatter: &Formatter,
) -> Result<()> {
    let mut retention = Retention::new(cleanup_config(&args, configured));
    let report = retention.sweep_now(engine)?;
    println!("{}", formatter.format_sweep(&report)?);
    Ok(())
}

/// Execute the stats command.
pub fn execute_stats(engine: &Engine, formatter: &Formatter) -> Result<()> {
    let stats = engine.stats()?;
    println!("{}", formatter.format_stats(&stats)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cleanup_overrides() {
        let configured = RetentionConfig {
            max_build_age_days: 90,
            ..Default::default()
        };
        let args = CleanupArgs {
            days: Some(7),
            dry_run: true,
        };
        let config = cleanup_config(&args, &configured);
        assert_eq!(config.max_build_age_days, 7);
        assert!(config.dry_run);

        let config = cleanup_config(&CleanupArgs { days: None, dry_run: false }, &configured);
        assert_eq!(config.max_build_age_days, 90);
        assert!(!config.dry_run);
    }
}
