//! SHA-256 fingerprints for pre-images and backups

use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use crate::error::{Result, UndoError};

const CHUNK_SIZE: usize = 64 * 1024;

/// Computes and checks content checksums
#[derive(Debug, Clone, Copy, Default)]
pub struct ChecksumVerifier;

impl ChecksumVerifier {
    /// Creates a new ChecksumVerifier instance
    pub fn new() -> Self {
        ChecksumVerifier
    }

    /// Hex SHA-256 of an in-memory buffer
    pub fn hash_bytes(content: &[u8]) -> String {
        hex::encode(Sha256::digest(content))
    }

    /// Hex SHA-256 of a file, streamed in fixed-size chunks
    ///
    /// # Returns
    ///
    /// The digest and the number of bytes read
    pub async fn hash_file(&self, path: &Path) -> Result<(String, u64)> {
        let mut file = File::open(path).await.map_err(|e| UndoError::io(path, e))?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut total = 0u64;

        loop {
            let n = file.read(&mut buf).await.map_err(|e| UndoError::io(path, e))?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            total += n as u64;
        }

        Ok((hex::encode(hasher.finalize()), total))
    }

    /// Checks that `path` still hashes to `expected`
    ///
    /// Fails with [`UndoError::Integrity`] on mismatch.
    pub async fn verify_file(&self, path: &Path, expected: &str) -> Result<()> {
        let (actual, _) = self.hash_file(path).await?;

        if actual.eq_ignore_ascii_case(expected) {
            Ok(())
        } else {
            Err(UndoError::Integrity {
                path: path.to_path_buf(),
                expected: expected.to_string(),
                actual,
            })
        }
    }
}
