//! Lineage query commands.

use super::{parse_build, Engine};
use crate::cli::Direction;
use crate::error::Result;
use crate::output::Formatter;

/// Execute the fingerprint command.
pub fn execute_fingerprint(checksum: &str, engine: &Engine, formatter: &Formatter) -> Result<()> {
    let occurrences = engine.query_fingerprint(checksum)?;
    println!("{}", formatter.format_occurrences(&occurrences)?);
    Ok(())
}

/// Execute the upstream command.
pub fn execute_upstream(build: &str, engine: &Engine, formatter: &Formatter) -> Result<()> {
    let id = parse_build(build)?;
    let fingerprints = engine.query_upstream(id.job(), id.number())?;
    println!("{}", formatter.format_fingerprints(&fingerprints)?);
    Ok(())
}

/// Execute the downstream command.
pub fn execute_downstream(checksum: &str, engine: &Engine, formatter: &Formatter) -> Result<()> {
    let builds = engine.query_downstream(checksum)?;
    println!("{}", formatter.format_builds(&builds)?);
    Ok(())
}

/// Execute the lineage command.
pub fn execute_lineage(
    build: &str,
    direction: Direction,
    engine: &Engine,
    formatter: &Formatter,
) -> Result<()> {
    let id = parse_build(build)?;
    let builds = match direction {
        Direction::Up => engine.query_transitive_upstream(id.job(), id.number())?,
        Direction::Down => engine.query_transitive_downstream(id.job(), id.number())?,
    };
    println!("{}", formatter.format_builds(&builds)?);
    Ok(())
}
