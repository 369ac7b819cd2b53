//! Checksum utilities for artifact dedup
//!
//! Every uploaded artifact is identified by the SHA-256 of its raw bytes.
//! The streaming hasher keeps memory bounded regardless of file size.

use crate::error::{PayscopeError, Result};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

/// Incremental SHA-256 hasher for streamed uploads.
///
/// Feed chunks as they arrive; `finish` returns the lowercase hex digest.
#[derive(Default)]
pub struct Sha256Stream {
    hasher: Sha256,
}

impl Sha256Stream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
    }

    pub fn finish(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

/// Compute the SHA-256 checksum of any readable source
pub fn compute_checksum<R: Read>(reader: &mut R) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Compute the SHA-256 checksum of a file on disk
pub fn compute_file_checksum(path: impl AsRef<Path>) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    compute_checksum(&mut file)
}

/// Verify that a file matches an expected checksum
pub fn verify_file_checksum(path: impl AsRef<Path>, expected: &str) -> Result<bool> {
    let actual = compute_file_checksum(path)?;
    if actual == expected {
        Ok(true)
    } else {
        Err(PayscopeError::ChecksumMismatch {
            expected: expected.to_string(),
            actual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_compute_checksum() {
        let data = b"hello world";
        let mut cursor = Cursor::new(data);
        let checksum = compute_checksum(&mut cursor).unwrap();
        assert_eq!(
            checksum,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_streaming_matches_one_shot() {
        let mut stream = Sha256Stream::new();
        stream.update(b"hello ");
        stream.update(b"world");
        let streamed = stream.finish();

        let mut cursor = Cursor::new(b"hello world");
        let whole = compute_checksum(&mut cursor).unwrap();
        assert_eq!(streamed, whole);
    }

    #[test]
    fn test_single_byte_change_changes_checksum() {
        let mut a = Sha256Stream::new();
        a.update(b"report-2025.csv contents");
        let mut b = Sha256Stream::new();
        b.update(b"report-2025.csv content!");
        assert_ne!(a.finish(), b.finish());
    }
}
