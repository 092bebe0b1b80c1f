//! Blob storage for uploaded documents.
//!
//! Blobs live under `uploads/<date-shard>/<job-id>/<sanitized-name>`. Writes
//! are atomic: bytes land in a temp file in the destination directory and
//! are renamed into place. The content hash (SHA-256) is computed during
//! `put` so the job record can reuse it.

use chrono::Utc;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

/// Opaque handle to a stored blob. For the filesystem backend this is the
/// path relative to the upload root.
pub type BlobHandle = String;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("blob not found: {0}")]
    NotFound(String),
    #[error("invalid blob handle: {0}")]
    InvalidHandle(String),
    #[error("blob io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of a `put`, carrying everything the job record needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutOutcome {
    pub handle: BlobHandle,
    pub size_bytes: u64,
    pub sha256: String,
}

/// Compute the lowercase-hex SHA-256 of a byte slice.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Storage backend seam. `delete` is idempotent; `put` then `get` yields
/// identical bytes.
#[async_trait::async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, job_id: &str, name: &str, bytes: &[u8]) -> Result<PutOutcome, BlobError>;
    async fn get(&self, handle: &str) -> Result<Vec<u8>, BlobError>;
    async fn delete(&self, handle: &str) -> Result<(), BlobError>;
    async fn exists(&self, handle: &str) -> Result<bool, BlobError>;
}

/// Filesystem-backed store rooted at an upload directory.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, handle: &str) -> Result<PathBuf, BlobError> {
        // Handles are relative paths minted by put(); refuse anything that
        // could climb out of the root.
        let rel = Path::new(handle);
        if rel.is_absolute()
            || rel
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(BlobError::InvalidHandle(handle.to_string()));
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait::async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, job_id: &str, name: &str, bytes: &[u8]) -> Result<PutOutcome, BlobError> {
        let shard = Utc::now().format("%Y-%m-%d").to_string();
        let rel = PathBuf::from(shard).join(job_id).join(name);
        let dest = self.root.join(&rel);
        let dir = dest
            .parent()
            .ok_or_else(|| BlobError::InvalidHandle(name.to_string()))?;
        tokio::fs::create_dir_all(dir).await?;

        let tmp = dir.join(format!(".{}.tmp", name));
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, &dest).await?;

        Ok(PutOutcome {
            handle: rel.to_string_lossy().replace('\\', "/"),
            size_bytes: bytes.len() as u64,
            sha256: sha256_hex(bytes),
        })
    }

    async fn get(&self, handle: &str) -> Result<Vec<u8>, BlobError> {
        let path = self.resolve(handle)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(BlobError::NotFound(handle.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn delete(&self, handle: &str) -> Result<(), BlobError> {
        let path = self.resolve(handle)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                // Best-effort cleanup of the now-empty job directory.
                if let Some(dir) = path.parent() {
                    let _ = tokio::fs::remove_dir(dir).await;
                }
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn exists(&self, handle: &str) -> Result<bool, BlobError> {
        let path = self.resolve(handle)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }
}

/// In-memory store for tests.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: std::sync::Mutex<std::collections::HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, job_id: &str, name: &str, bytes: &[u8]) -> Result<PutOutcome, BlobError> {
        let handle = format!("mem/{}/{}", job_id, name);
        let mut blobs = self.blobs.lock().unwrap_or_else(|e| e.into_inner());
        blobs.insert(handle.clone(), bytes.to_vec());
        Ok(PutOutcome {
            handle,
            size_bytes: bytes.len() as u64,
            sha256: sha256_hex(bytes),
        })
    }

    async fn get(&self, handle: &str) -> Result<Vec<u8>, BlobError> {
        let blobs = self.blobs.lock().unwrap_or_else(|e| e.into_inner());
        blobs
            .get(handle)
            .cloned()
            .ok_or_else(|| BlobError::NotFound(handle.to_string()))
    }

    async fn delete(&self, handle: &str) -> Result<(), BlobError> {
        let mut blobs = self.blobs.lock().unwrap_or_else(|e| e.into_inner());
        blobs.remove(handle);
        Ok(())
    }

    async fn exists(&self, handle: &str) -> Result<bool, BlobError> {
        let blobs = self.blobs.lock().unwrap_or_else(|e| e.into_inner());
        Ok(blobs.contains_key(handle))
    }
}
