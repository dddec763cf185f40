//! Vector indexes keyed by document id.
//!
//! `VectorIndex` is the capability the pipelines depend on. `MemoryVectorIndex`
//! keeps every namespace in process and can mirror itself to a JSON file so a
//! CLI invocation sees what the previous one ingested.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::Embedding;
use crate::error::{IndexError, IndexResult};
use crate::similarity::{Metric, SimilarityResult, find_top_k};

/// Parameters an index namespace is created with. Fixed for its lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    /// Namespace name.
    pub name: String,

    /// Length of every vector stored in the namespace.
    pub dimension: usize,

    /// Metric used to rank neighbours.
    pub metric: Metric,
}

impl IndexSpec {
    /// Create a new index spec.
    pub fn new(name: impl Into<String>, dimension: usize, metric: Metric) -> Self {
        Self {
            name: name.into(),
            dimension,
            metric,
        }
    }

    /// Describe how `other` differs from this spec, if at all.
    pub fn mismatch(&self, other: &IndexSpec) -> Option<String> {
        if self.dimension != other.dimension {
            return Some(format!(
                "dimension {} != {}",
                other.dimension, self.dimension
            ));
        }
        if self.metric != other.metric {
            return Some(format!("metric {} != {}", other.metric, self.metric));
        }
        None
    }
}

/// A vector to insert or replace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    /// Document id.
    pub id: String,

    /// The embedding.
    pub values: Embedding,
}

impl VectorRecord {
    /// Create a new record.
    pub fn new(id: impl Into<String>, values: Embedding) -> Self {
        Self {
            id: id.into(),
            values,
        }
    }
}

/// A store of vectors organised in named namespaces.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Name of the backend, for diagnostics.
    fn backend(&self) -> &str;

    /// Look up a namespace. `None` if it does not exist.
    async fn describe_index(&self, name: &str) -> IndexResult<Option<IndexSpec>>;

    /// Create a namespace. Fails with [`IndexError::AlreadyExists`] if present.
    ///
    /// Returns once the namespace accepts upserts and queries.
    async fn create_index(&self, spec: &IndexSpec) -> IndexResult<()>;

    /// Insert or replace vectors by id. Returns how many were written.
    async fn upsert(&self, name: &str, records: Vec<VectorRecord>) -> IndexResult<usize>;

    /// Return at most `top_k` matches, best first. Empty if nothing is indexed.
    async fn query(
        &self,
        name: &str,
        vector: &[f32],
        top_k: usize,
    ) -> IndexResult<Vec<SimilarityResult>>;
}

/// A single namespace of vectors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarityIndex {
    /// Parameters the namespace was created with.
    spec: IndexSpec,

    /// Stored vectors by id.
    entries: HashMap<String, Embedding>,
}

impl SimilarityIndex {
    /// Create an empty namespace.
    pub fn new(spec: IndexSpec) -> Self {
        Self {
            spec,
            entries: HashMap::new(),
        }
    }

    /// Parameters of this namespace.
    pub fn spec(&self) -> &IndexSpec {
        &self.spec
    }

    /// Insert or replace vectors. Validates every record before writing any.
    pub fn upsert(&mut self, records: Vec<VectorRecord>) -> IndexResult<usize> {
        if let Some(bad) = records
            .iter()
            .find(|r| r.values.len() != self.spec.dimension)
        {
            return Err(IndexError::DimensionMismatch {
                expected: self.spec.dimension,
                actual: bad.values.len(),
            });
        }

        let count = records.len();
        for record in records {
            debug!("Upserted vector into {}: {}", self.spec.name, record.id);
            self.entries.insert(record.id, record.values);
        }
        Ok(count)
    }

    /// Get an embedding by ID.
    pub fn get(&self, id: &str) -> Option<&Embedding> {
        self.entries.get(id)
    }

    /// Get the number of entries in the index.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the index is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Search for the `k` most similar vectors.
    pub fn search(&self, query: &[f32], k: usize) -> IndexResult<Vec<SimilarityResult>> {
        if query.len() != self.spec.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.spec.dimension,
                actual: query.len(),
            });
        }

        let candidates = self
            .entries
            .iter()
            .map(|(id, embedding)| (id.as_str(), embedding.as_slice()));
        find_top_k(query, candidates, k, self.spec.metric)
    }
}

/// In-process vector index with optional JSON persistence.
#[derive(Default)]
pub struct MemoryVectorIndex {
    /// Namespaces by name.
    namespaces: RwLock<HashMap<String, SimilarityIndex>>,

    /// File mirrored after every write, if any.
    path: Option<PathBuf>,
}

impl MemoryVectorIndex {
    /// Create an empty, purely in-memory index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open an index mirrored to `path`, loading it if the file exists.
    pub async fn with_persistence(path: impl AsRef<Path>) -> IndexResult<Self> {
        let path = path.as_ref().to_path_buf();

        let mut namespaces = HashMap::new();
        if fs::try_exists(&path).await? {
            let content = fs::read_to_string(&path).await?;
            let stored: Vec<SimilarityIndex> = serde_json::from_str(&content)?;
            for ns in stored {
                namespaces.insert(ns.spec.name.clone(), ns);
            }
            info!(
                "Loaded {} index namespaces from {}",
                namespaces.len(),
                path.display()
            );
        }

        Ok(Self {
            namespaces: RwLock::new(namespaces),
            path: Some(path),
        })
    }

    /// Number of vectors in a namespace, `None` if it does not exist.
    pub async fn entry_count(&self, name: &str) -> Option<usize> {
        self.namespaces.read().await.get(name).map(SimilarityIndex::len)
    }

    /// Stored vector for `id` in a namespace.
    pub async fn vector(&self, name: &str, id: &str) -> Option<Embedding> {
        self.namespaces
            .read()
            .await
            .get(name)
            .and_then(|ns| ns.get(id).cloned())
    }

    /// Write the namespaces to disk with `staged` in place of its current
    /// version, atomically via a temp file.
    ///
    /// Callers swap `staged` into memory only after this succeeds, so a
    /// failed write leaves both memory and disk unchanged.
    async fn save(
        &self,
        namespaces: &HashMap<String, SimilarityIndex>,
        staged: &SimilarityIndex,
    ) -> IndexResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let stored: Vec<&SimilarityIndex> = namespaces
            .values()
            .filter(|ns| ns.spec.name != staged.spec.name)
            .chain(std::iter::once(staged))
            .collect();
        let content = serde_json::to_string(&stored)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, content).await?;
        fs::rename(&temp_path, path).await?;

        debug!("Saved {} index namespaces to disk", stored.len());
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    fn backend(&self) -> &str {
        "memory"
    }

    async fn describe_index(&self, name: &str) -> IndexResult<Option<IndexSpec>> {
        Ok(self
            .namespaces
            .read()
            .await
            .get(name)
            .map(|ns| ns.spec.clone()))
    }

    async fn create_index(&self, spec: &IndexSpec) -> IndexResult<()> {
        let mut namespaces = self.namespaces.write().await;
        if namespaces.contains_key(&spec.name) {
            return Err(IndexError::AlreadyExists(spec.name.clone()));
        }

        let staged = SimilarityIndex::new(spec.clone());
        self.save(&namespaces, &staged).await?;
        namespaces.insert(spec.name.clone(), staged);

        info!(
            "Created index {} (dimension {}, metric {})",
            spec.name, spec.dimension, spec.metric
        );
        Ok(())
    }

    async fn upsert(&self, name: &str, records: Vec<VectorRecord>) -> IndexResult<usize> {
        let mut namespaces = self.namespaces.write().await;
        let mut staged = namespaces
            .get(name)
            .cloned()
            .ok_or_else(|| IndexError::NotFound(name.to_string()))?;

        let count = staged.upsert(records)?;
        self.save(&namespaces, &staged).await?;
        namespaces.insert(name.to_string(), staged);
        Ok(count)
    }

    async fn query(
        &self,
        name: &str,
        vector: &[f32],
        top_k: usize,
    ) -> IndexResult<Vec<SimilarityResult>> {
        let namespaces = self.namespaces.read().await;
        let ns = namespaces
            .get(name)
            .ok_or_else(|| IndexError::NotFound(name.to_string()))?;
        ns.search(vector, top_k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn spec() -> IndexSpec {
        IndexSpec::new("docs", 3, Metric::Cosine)
    }

    #[tokio::test]
    async fn test_create_then_describe() {
        let index = MemoryVectorIndex::new();
        assert_eq!(index.describe_index("docs").await.unwrap(), None);

        index.create_index(&spec()).await.unwrap();
        assert_eq!(index.describe_index("docs").await.unwrap(), Some(spec()));
    }

    #[tokio::test]
    async fn test_second_create_reports_already_exists() {
        let index = MemoryVectorIndex::new();
        index.create_index(&spec()).await.unwrap();

        let err = index.create_index(&spec()).await.unwrap_err();
        assert!(matches!(err, IndexError::AlreadyExists(name) if name == "docs"));
    }

    #[tokio::test]
    async fn test_query_empty_namespace_returns_no_matches() {
        let index = MemoryVectorIndex::new();
        index.create_index(&spec()).await.unwrap();

        let matches = index.query("docs", &[1.0, 0.0, 0.0], 1).await.unwrap();
        assert!(matches.is_empty());
    }

    #[tokio::test]
    async fn test_query_ranks_by_similarity() {
        let index = MemoryVectorIndex::new();
        index.create_index(&spec()).await.unwrap();
        index
            .upsert(
                "docs",
                vec![
                    VectorRecord::new("a", vec![1.0, 0.0, 0.0]),
                    VectorRecord::new("b", vec![0.0, 1.0, 0.0]),
                    VectorRecord::new("c", vec![0.7, 0.7, 0.0]),
                ],
            )
            .await
            .unwrap();

        let matches = index.query("docs", &[0.9, 0.1, 0.0], 2).await.unwrap();
        let ids: Vec<&str> = matches.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_upsert_replaces_existing_id() {
        let index = MemoryVectorIndex::new();
        index.create_index(&spec()).await.unwrap();
        index
            .upsert("docs", vec![VectorRecord::new("a", vec![1.0, 0.0, 0.0])])
            .await
            .unwrap();
        index
            .upsert("docs", vec![VectorRecord::new("a", vec![0.0, 0.0, 1.0])])
            .await
            .unwrap();

        assert_eq!(index.entry_count("docs").await, Some(1));
        assert_eq!(index.vector("docs", "a").await, Some(vec![0.0, 0.0, 1.0]));
    }

    #[tokio::test]
    async fn test_upsert_rejects_wrong_dimension_without_partial_write() {
        let index = MemoryVectorIndex::new();
        index.create_index(&spec()).await.unwrap();

        let err = index
            .upsert(
                "docs",
                vec![
                    VectorRecord::new("ok", vec![1.0, 0.0, 0.0]),
                    VectorRecord::new("bad", vec![1.0, 0.0]),
                ],
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            IndexError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));
        assert_eq!(index.entry_count("docs").await, Some(0));
    }

    #[tokio::test]
    async fn test_missing_namespace_is_not_found() {
        let index = MemoryVectorIndex::new();
        let err = index.query("nope", &[1.0], 1).await.unwrap_err();
        assert!(matches!(err, IndexError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_persistence_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("index.json");

        {
            let index = MemoryVectorIndex::with_persistence(&path).await.unwrap();
            index.create_index(&spec()).await.unwrap();
            index
                .upsert("docs", vec![VectorRecord::new("a", vec![1.0, 0.0, 0.0])])
                .await
                .unwrap();
        }

        let reopened = MemoryVectorIndex::with_persistence(&path).await.unwrap();
        assert_eq!(reopened.describe_index("docs").await.unwrap(), Some(spec()));
        let matches = reopened.query("docs", &[1.0, 0.0, 0.0], 1).await.unwrap();
        assert_eq!(matches[0].id, "a");
    }

    #[tokio::test]
    async fn test_failed_save_keeps_previous_vectors() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("index.json");
        let index = MemoryVectorIndex::with_persistence(&path).await.unwrap();
        index.create_index(&spec()).await.unwrap();
        index
            .upsert("docs", vec![VectorRecord::new("a", vec![1.0, 0.0, 0.0])])
            .await
            .unwrap();

        // The temp file cannot be written over a directory.
        std::fs::create_dir(temp_dir.path().join("index.json.tmp")).unwrap();

        let err = index
            .upsert(
                "docs",
                vec![
                    VectorRecord::new("a", vec![0.0, 1.0, 0.0]),
                    VectorRecord::new("b", vec![0.0, 0.0, 1.0]),
                ],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::Io(_)));

        assert_eq!(index.entry_count("docs").await, Some(1));
        assert_eq!(index.vector("docs", "a").await, Some(vec![1.0, 0.0, 0.0]));
        let matches = index.query("docs", &[0.0, 0.0, 1.0], 2).await.unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].id, "a");
    }

    #[tokio::test]
    async fn test_failed_save_does_not_create_namespace() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir(temp_dir.path().join("index.json.tmp")).unwrap();
        let index = MemoryVectorIndex::with_persistence(temp_dir.path().join("index.json"))
            .await
            .unwrap();

        assert!(index.create_index(&spec()).await.is_err());
        assert_eq!(index.describe_index("docs").await.unwrap(), None);
    }

    #[test]
    fn test_spec_mismatch_detail() {
        let other = IndexSpec::new("docs", 4, Metric::Cosine);
        assert_eq!(spec().mismatch(&other), Some("dimension 4 != 3".to_string()));
        assert_eq!(spec().mismatch(&spec()), None);
    }
}
