//! Artifact integrity: checksum and byte-size sanity.

use crate::error::{RenderError, Result};
use sha2::{Digest, Sha256};
use std::path::Path;

/// Checksum and size of a verified artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityReport {
    /// Lowercase hex SHA-256 of the file content
    pub checksum: String,
    /// Size in bytes
    pub size: u64,
}

/// Hex SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Re-read an artifact from disk, check it is non-empty and matches the
/// size its renderer reported, and compute its checksum.
pub async fn verify_artifact(path: &Path, reported_size: u64) -> Result<IntegrityReport> {
    let bytes = tokio::fs::read(path).await?;
    let size = bytes.len() as u64;
    if size == 0 {
        return Err(RenderError::Integrity("artifact is empty".to_string()));
    }
    if size != reported_size {
        return Err(RenderError::Integrity(format!(
            "artifact is {} bytes, renderer reported {}",
            size, reported_size
        )));
    }
    Ok(IntegrityReport {
        checksum: sha256_hex(&bytes),
        size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digest() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn test_verify_checks_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.csv");
        tokio::fs::write(&path, b"a,b\n").await.unwrap();

        let report = verify_artifact(&path, 4).await.unwrap();
        assert_eq!(report.size, 4);
        assert_eq!(report.checksum, sha256_hex(b"a,b\n"));

        assert!(matches!(
            verify_artifact(&path, 10).await,
            Err(RenderError::Integrity(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_artifact_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.pdf");
        tokio::fs::write(&path, b"").await.unwrap();
        assert!(matches!(
            verify_artifact(&path, 0).await,
            Err(RenderError::Integrity(_))
        ));
    }
}
