//! SHA-256 fingerprints of artifact files

use crate::IngestError;
use provenance_domain::Fingerprint;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

const CHUNK: usize = 64 * 1024;

/// Fingerprint of an in-memory buffer
pub fn fingerprint_bytes(data: &[u8]) -> Result<Fingerprint, IngestError> {
    to_fingerprint(Sha256::digest(data).as_slice())
}

/// Fingerprint of a file's contents, read in chunks
pub fn fingerprint_file(path: impl AsRef<Path>) -> Result<Fingerprint, IngestError> {
    let mut reader = BufReader::new(File::open(path.as_ref())?);
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; CHUNK];
    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    to_fingerprint(hasher.finalize().as_slice())
}

fn to_fingerprint(digest: &[u8]) -> Result<Fingerprint, IngestError> {
    Fingerprint::new(&hex::encode(digest)).map_err(IngestError::InvalidInput)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn test_known_digests() {
        assert_eq!(fingerprint_bytes(b"").unwrap().as_str(), EMPTY_SHA256);
        assert_eq!(
            fingerprint_bytes(b"abc").unwrap().as_str(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_file_matches_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.jar");
        let data: Vec<u8> = (0..200_000u32).map(|n| (n % 251) as u8).collect();
        std::fs::write(&path, &data).unwrap();

        assert_eq!(fingerprint_file(&path).unwrap(), fingerprint_bytes(&data).unwrap());
        assert!(matches!(
            fingerprint_file(dir.path().join("missing.jar")),
            Err(IngestError::Io(_))
        ));
    }
}
