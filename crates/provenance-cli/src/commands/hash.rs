//! Hash command implementation.

use crate::error::Result;
use crate::output::Formatter;
use provenance_engine::fingerprint_file;
use std::path::PathBuf;

/// Execute the hash command.
pub fn execute_hash(files: &[PathBuf], formatter: &Formatter) -> Result<()> {
    let mut hashes = Vec::with_capacity(files.len());
    for path in files {
        hashes.push((path.clone(), fingerprint_file(path)?));
    }
    println!("{}", formatter.format_hashes(&hashes)?);
    Ok(())
}
