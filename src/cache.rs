//! Snapshot cache keyed by content hash.
//!
//! Processing the same bytes twice short-circuits the whole pipeline.
//! Documents are immutable once uploaded, so entries never expire; a
//! force-refresh request bypasses the read and overwrites the entry.
//! Cache failures are never fatal: the pipeline proceeds as if no cache
//! existed and the failure is logged.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::PdfExtraction;

/// Errors from a snapshot store. Callers log these and continue.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt cache entry: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("cache lock poisoned")]
    Poisoned,
}

/// Key-value store for reconciled snapshots, keyed by the 256-bit content
/// hash of the input bytes.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn get(&self, hash: &str) -> Result<Option<PdfExtraction>, CacheError>;
    async fn put(&self, hash: &str, snapshot: &PdfExtraction) -> Result<(), CacheError>;
    async fn invalidate(&self, hash: &str) -> Result<(), CacheError>;
}

/// File-backed store: one JSON file per snapshot under a two-level
/// hash-prefix directory structure, `{dir}/{hash[0..2]}/{hash}.json`.
pub struct FileSnapshotStore {
    dir: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn entry_path(&self, hash: &str) -> PathBuf {
        self.dir.join(&hash[..2]).join(format!("{}.json", hash))
    }

    /// Number of cached snapshots on disk.
    pub fn count(&self) -> Result<usize, CacheError> {
        if !self.dir.exists() {
            return Ok(0);
        }
        let mut count = 0;
        for shard in std::fs::read_dir(&self.dir)? {
            let shard = shard?;
            if shard.file_type()?.is_dir() {
                count += std::fs::read_dir(shard.path())?.count();
            }
        }
        Ok(count)
    }

    /// Delete every cached snapshot.
    pub fn clear(&self) -> Result<(), CacheError> {
        if self.dir.exists() {
            std::fs::remove_dir_all(&self.dir)?;
        }
        Ok(())
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn get(&self, hash: &str) -> Result<Option<PdfExtraction>, CacheError> {
        let path = self.entry_path(hash);
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&raw)?))
    }

    async fn put(&self, hash: &str, snapshot: &PdfExtraction) -> Result<(), CacheError> {
        let path = self.entry_path(hash);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // Write to a sibling temp file and rename so a crash mid-write
        // never leaves a partial entry.
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(snapshot)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    async fn invalidate(&self, hash: &str) -> Result<(), CacheError> {
        let path = self.entry_path(hash);
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        Ok(())
    }
}

/// In-memory store for tests and single-shot CLI runs.
#[derive(Default)]
pub struct MemorySnapshotStore {
    entries: RwLock<HashMap<String, PdfExtraction>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn get(&self, hash: &str) -> Result<Option<PdfExtraction>, CacheError> {
        let guard = self.entries.read().map_err(|_| CacheError::Poisoned)?;
        Ok(guard.get(hash).cloned())
    }

    async fn put(&self, hash: &str, snapshot: &PdfExtraction) -> Result<(), CacheError> {
        let mut guard = self.entries.write().map_err(|_| CacheError::Poisoned)?;
        guard.insert(hash.to_string(), snapshot.clone());
        Ok(())
    }

    async fn invalidate(&self, hash: &str) -> Result<(), CacheError> {
        let mut guard = self.entries.write().map_err(|_| CacheError::Poisoned)?;
        guard.remove(hash);
        Ok(())
    }
}

/// Default cache directory: `~/.cache/planprobe/snapshots`.
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("planprobe")
        .join("snapshots")
}

/// Resolve a store for the CLI: file-backed under `dir` if given,
/// otherwise the default cache directory.
pub fn open_store(dir: Option<&Path>) -> FileSnapshotStore {
    FileSnapshotStore::new(dir.map(Path::to_path_buf).unwrap_or_else(default_cache_dir))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PdfExtraction;
    use tempfile::tempdir;

    fn snapshot(bytes: &[u8]) -> PdfExtraction {
        PdfExtraction::empty("test.pdf", bytes, "none".to_string())
    }

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let dir = tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path().to_path_buf());
        let snap = snapshot(b"abc");
        let hash = snap.content_hash.clone();

        assert!(store.get(&hash).await.unwrap().is_none());
        store.put(&hash, &snap).await.unwrap();
        let loaded = store.get(&hash).await.unwrap().unwrap();
        assert_eq!(loaded, snap);
    }

    #[tokio::test]
    async fn test_file_store_invalidate() {
        let dir = tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path().to_path_buf());
        let snap = snapshot(b"abc");
        store.put(&snap.content_hash, &snap).await.unwrap();
        store.invalidate(&snap.content_hash).await.unwrap();
        assert!(store.get(&snap.content_hash).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_store_sharded_layout() {
        let dir = tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path().to_path_buf());
        let snap = snapshot(b"abc");
        store.put(&snap.content_hash, &snap).await.unwrap();

        let shard = dir.path().join(&snap.content_hash[..2]);
        assert!(shard.is_dir());
        assert_eq!(store.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_memory_store_round_trip() {
        let store = MemorySnapshotStore::new();
        let snap = snapshot(b"xyz");
        store.put(&snap.content_hash, &snap).await.unwrap();
        assert_eq!(store.get(&snap.content_hash).await.unwrap(), Some(snap.clone()));
        store.invalidate(&snap.content_hash).await.unwrap();
        assert!(store.get(&snap.content_hash).await.unwrap().is_none());
    }
}
