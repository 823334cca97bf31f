//! Content — filesystem-backed blob storage for object payloads and
//! resumable-upload staging regions.

use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use uuid::Uuid;

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct ContentStore {
    root: PathBuf,
}

impl ContentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub async fn ensure_dirs(&self) -> Result<()> {
        fs::create_dir_all(self.objects_dir()).await?;
        fs::create_dir_all(self.tmp_dir()).await?;
        Ok(())
    }

    fn objects_dir(&self) -> PathBuf {
        self.root.join("objects")
    }

    fn tmp_dir(&self) -> PathBuf {
        self.root.join("tmp")
    }

    /// Allocate a fresh path for a new object version's bytes.
    pub fn new_object_path(&self, bucket_id: &str) -> PathBuf {
        self.objects_dir().join(bucket_id).join(Uuid::new_v4().to_string())
    }

    pub fn resumable_session_path(&self, session_id: &str) -> PathBuf {
        self.tmp_dir().join(session_id)
    }

    /// Write `bytes` atomically at `path`, creating parent directories as
    /// needed. Used for ordinary (non-resumable) uploads and for finalizing
    /// resumable sessions.
    pub async fn write_whole(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(path, bytes).await?;
        Ok(())
    }

    pub async fn read_whole(&self, path: &Path) -> Result<Vec<u8>> {
        fs::read(path)
            .await
            .map_err(|e| Error::NotFound(format!("content at {}: {e}", path.display())))
    }

    pub async fn remove(&self, path: &Path) -> Result<()> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Append `chunk` to the resumable session's staging file at `offset`,
    /// creating the file if this is the first chunk. Enforces nothing about
    /// ordering itself — the resumable-session state machine in
    /// `objectstore::resumable` is the one that rejects out-of-order chunks
    /// before calling this.
    pub async fn append_at(&self, path: &Path, offset: u64, chunk: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(path)
            .await?;
        file.seek(std::io::SeekFrom::Start(offset)).await?;
        file.write_all(chunk).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = std::env::temp_dir().join(format!("emu-content-test-{}", Uuid::new_v4()));
        let store = ContentStore::new(&dir);
        store.ensure_dirs().await.unwrap();

        let path = store.new_object_path("bucket1");
        store.write_whole(&path, b"hello world").await.unwrap();
        let read_back = store.read_whole(&path).await.unwrap();
        assert_eq!(read_back, b"hello world");

        store.remove(&path).await.unwrap();
        assert!(store.read_whole(&path).await.is_err());

        let _ = fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn append_at_builds_up_linear_chunks() {
        let dir = std::env::temp_dir().join(format!("emu-content-test-{}", Uuid::new_v4()));
        let store = ContentStore::new(&dir);
        store.ensure_dirs().await.unwrap();

        let path = store.resumable_session_path("session-1");
        store.append_at(&path, 0, b"ABCDE").await.unwrap();
        store.append_at(&path, 5, b"FGHIJ").await.unwrap();

        let bytes = store.read_whole(&path).await.unwrap();
        assert_eq!(bytes, b"ABCDEFGHIJ");

        let _ = fs::remove_dir_all(&dir).await;
    }
}
