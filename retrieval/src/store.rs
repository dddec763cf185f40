//! Document content storage.
//!
//! The pipelines only need a key-value blob store: `put`, `get` and a
//! `delete` used to undo a partially applied ingestion.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};

/// Key-value blob store for raw document text.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Name of the backend, for diagnostics.
    fn backend(&self) -> &str;

    /// Write `content` under `id`, replacing any previous value.
    async fn put(&self, id: &str, content: &[u8]) -> StoreResult<()>;

    /// Read the content stored under `id`.
    async fn get(&self, id: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Remove `id`. Removing a missing id succeeds.
    async fn delete(&self, id: &str) -> StoreResult<()>;
}

/// Stores each document as a file named by its id.
pub struct FsDocumentStore {
    /// Root directory for document storage.
    root: PathBuf,

    /// Distinguishes temp files of concurrent writes.
    write_seq: AtomicU64,
}

impl FsDocumentStore {
    /// Open a store at the given root directory.
    ///
    /// This will create the directory if it doesn't exist.
    pub async fn new(root: impl AsRef<Path>) -> StoreResult<Self> {
        let root = root.as_ref().to_path_buf();

        fs::create_dir_all(&root)
            .await
            .map_err(|e| StoreError::CreateDirectory(format!("{}: {e}", root.display())))?;

        info!("Opened document store at {}", root.display());
        Ok(Self {
            root,
            write_seq: AtomicU64::new(0),
        })
    }

    /// Path for a document, rejecting ids that are not a single plain
    /// file name.
    fn document_path(&self, id: &str) -> StoreResult<PathBuf> {
        let invalid = id.is_empty()
            || id.starts_with('.')
            || id.contains(['/', '\\', '\0'])
            || Path::new(id).components().count() != 1;
        if invalid {
            return Err(StoreError::InvalidKey(id.to_string()));
        }
        Ok(self.root.join(id))
    }
}

#[async_trait]
impl DocumentStore for FsDocumentStore {
    fn backend(&self) -> &str {
        "filesystem"
    }

    async fn put(&self, id: &str, content: &[u8]) -> StoreResult<()> {
        let path = self.document_path(id)?;
        let write_err = |source| StoreError::Write {
            id: id.to_string(),
            source,
        };

        // Write atomically using a hidden temp file
        let seq = self.write_seq.fetch_add(1, Ordering::Relaxed);
        let temp_path = self.root.join(format!(".{id}.{seq}.tmp"));
        fs::write(&temp_path, content).await.map_err(write_err)?;
        if let Err(e) = fs::rename(&temp_path, &path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(write_err(e));
        }

        debug!("Stored document {id} ({} bytes)", content.len());
        Ok(())
    }

    async fn get(&self, id: &str) -> StoreResult<Option<Vec<u8>>> {
        let path = self.document_path(id)?;
        match fs::read(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Read {
                id: id.to_string(),
                source,
            }),
        }
    }

    async fn delete(&self, id: &str) -> StoreResult<()> {
        let path = self.document_path(id)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!("Deleted document {id}");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Delete {
                id: id.to_string(),
                source,
            }),
        }
    }
}

/// In-memory document store.
#[derive(Default)]
pub struct MemoryDocumentStore {
    documents: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored documents.
    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    /// Whether the store holds no documents.
    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    fn backend(&self) -> &str {
        "memory"
    }

    async fn put(&self, id: &str, content: &[u8]) -> StoreResult<()> {
        self.documents
            .write()
            .await
            .insert(id.to_string(), content.to_vec());
        Ok(())
    }

    async fn get(&self, id: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.documents.read().await.get(id).cloned())
    }

    async fn delete(&self, id: &str) -> StoreResult<()> {
        self.documents.write().await.remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_fs_put_and_get() {
        let temp_dir = TempDir::new().unwrap();
        let store = FsDocumentStore::new(temp_dir.path()).await.unwrap();

        store.put("a.txt", b"hello world").await.unwrap();

        assert_eq!(store.get("a.txt").await.unwrap(), Some(b"hello world".to_vec()));
        assert_eq!(store.get("b.txt").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_fs_put_overwrites() {
        let temp_dir = TempDir::new().unwrap();
        let store = FsDocumentStore::new(temp_dir.path()).await.unwrap();

        store.put("a.txt", b"first").await.unwrap();
        store.put("a.txt", b"second").await.unwrap();

        assert_eq!(store.get("a.txt").await.unwrap(), Some(b"second".to_vec()));
        let files: Vec<_> = std::fs::read_dir(temp_dir.path()).unwrap().collect();
        assert_eq!(files.len(), 1, "temp files must not be left behind");
    }

    #[tokio::test]
    async fn test_fs_persists_across_instances() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = FsDocumentStore::new(temp_dir.path()).await.unwrap();
            store.put("notes.txt", b"kept").await.unwrap();
        }

        let store = FsDocumentStore::new(temp_dir.path()).await.unwrap();
        assert_eq!(store.get("notes.txt").await.unwrap(), Some(b"kept".to_vec()));
    }

    #[tokio::test]
    async fn test_fs_delete_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let store = FsDocumentStore::new(temp_dir.path()).await.unwrap();

        store.put("a.txt", b"x").await.unwrap();
        store.delete("a.txt").await.unwrap();
        store.delete("a.txt").await.unwrap();

        assert_eq!(store.get("a.txt").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_fs_rejects_path_like_ids() {
        let temp_dir = TempDir::new().unwrap();
        let store = FsDocumentStore::new(temp_dir.path()).await.unwrap();

        for id in ["", "..", "../escape.txt", "dir/a.txt", ".hidden", "a\\b"] {
            let err = store.put(id, b"x").await.unwrap_err();
            assert!(matches!(err, StoreError::InvalidKey(_)), "{id:?} accepted");
        }
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryDocumentStore::new();
        assert!(store.is_empty().await);

        store.put("a.txt", b"hello").await.unwrap();
        assert_eq!(store.get("a.txt").await.unwrap(), Some(b"hello".to_vec()));
        assert_eq!(store.len().await, 1);

        store.delete("a.txt").await.unwrap();
        assert!(store.is_empty().await);
    }
}
