//! SHA-256 content digests, hex encoded.

use crate::error::SyncError;
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::io::AsyncReadExt;

const CHUNK_SIZE: usize = 8192;

/// Digest a file's contents without loading it all into memory.
pub async fn digest(path: &Path) -> Result<String, SyncError> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| SyncError::io(path, e))?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];

    loop {
        let n = file
            .read(&mut buffer)
            .await
            .map_err(|e| SyncError::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Blocking variant used by the initial scan.
pub fn digest_blocking(path: &Path) -> Result<String, SyncError> {
    use std::io::Read;

    let mut file = std::fs::File::open(path).map_err(|e| SyncError::io(path, e))?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; CHUNK_SIZE];

    loop {
        let n = file.read(&mut buffer).map_err(|e| SyncError::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

pub fn digest_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const HELLO_WORLD: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    #[tokio::test]
    async fn test_digest_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.txt");
        std::fs::write(&path, "hello world").unwrap();

        assert_eq!(digest(&path).await.unwrap(), HELLO_WORLD);
        assert_eq!(digest_blocking(&path).unwrap(), HELLO_WORLD);
        assert_eq!(digest_bytes(b"hello world"), HELLO_WORLD);
    }

    #[tokio::test]
    async fn test_digest_spans_chunks() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("big.bin");
        let body: Vec<u8> = (0..CHUNK_SIZE * 3 + 17).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &body).unwrap();

        assert_eq!(digest(&path).await.unwrap(), digest_bytes(&body));
    }

    #[tokio::test]
    async fn test_digest_missing_file() {
        let dir = tempdir().unwrap();
        let err = digest(&dir.path().join("nope")).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
