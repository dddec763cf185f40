//! Configuration for the docqa pipelines.

use std::path::{Path, PathBuf};
use std::time::Duration;

use docqa_embeddings::{DEFAULT_DIMENSION, DEFAULT_MODEL, IndexSpec, Metric};
use serde::{Deserialize, Serialize};

use crate::error::{Result, RetrievalError};

/// Configuration for ingestion and retrieval.
///
/// Every section falls back to its defaults when absent from a config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Embedding provider configuration.
    pub embedding: EmbeddingConfig,

    /// Vector index configuration.
    pub index: IndexConfig,

    /// Document store configuration.
    pub store: StoreConfig,

    /// Answer generation configuration.
    pub generation: GenerationConfig,

    /// Ingestion configuration.
    pub ingest: IngestConfig,

    /// Per-call deadlines.
    pub timeouts: TimeoutConfig,
}

impl RetrievalConfig {
    /// Parse a configuration from TOML.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| RetrievalError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| RetrievalError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    /// Default location of the config file, `<config dir>/docqa/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("docqa").join("config.toml"))
    }

    /// Render the configuration as TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| RetrievalError::Config(e.to_string()))
    }

    /// Set the embedding configuration.
    pub fn with_embedding(mut self, config: EmbeddingConfig) -> Self {
        self.embedding = config;
        self
    }

    /// Set the index configuration.
    pub fn with_index(mut self, config: IndexConfig) -> Self {
        self.index = config;
        self
    }

    /// Set the document store configuration.
    pub fn with_store(mut self, config: StoreConfig) -> Self {
        self.store = config;
        self
    }

    /// Set the ingestion configuration.
    pub fn with_ingest(mut self, config: IngestConfig) -> Self {
        self.ingest = config;
        self
    }

    /// Set the deadlines.
    pub fn with_timeouts(mut self, config: TimeoutConfig) -> Self {
        self.timeouts = config;
        self
    }

    /// The index namespace documents are written to.
    pub fn index_spec(&self) -> IndexSpec {
        IndexSpec::new(
            self.index.name.clone(),
            self.embedding.dimensions,
            self.index.metric,
        )
    }

    /// Reject values the pipelines cannot run with.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(RetrievalError::Config(msg.to_string()));

        if self.embedding.model.trim().is_empty() {
            return invalid("embedding.model must not be empty");
        }
        if self.embedding.dimensions == 0 {
            return invalid("embedding.dimensions must be positive");
        }
        if self.index.name.trim().is_empty() {
            return invalid("index.name must not be empty");
        }
        if self.generation.model.trim().is_empty() {
            return invalid("generation.model must not be empty");
        }
        if self.ingest.max_concurrent_embeddings == 0 {
            return invalid("ingest.max_concurrent_embeddings must be positive");
        }
        let t = &self.timeouts;
        if [t.embed_secs, t.index_secs, t.store_secs, t.generate_secs].contains(&0) {
            return invalid("timeouts must be positive");
        }
        Ok(())
    }
}

fn data_dir() -> PathBuf {
    dirs::data_dir().unwrap_or_default().join("docqa")
}

/// Configuration for the embedding provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Which provider to use.
    pub provider: EmbeddingProviderType,

    /// Model identifier, shared by ingestion and retrieval.
    pub model: String,

    /// Length of every embedding.
    pub dimensions: usize,

    /// Override of the provider's API base URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderType::OpenAI,
            model: DEFAULT_MODEL.to_string(),
            dimensions: DEFAULT_DIMENSION,
            base_url: None,
        }
    }
}

/// Type of embedding provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmbeddingProviderType {
    /// OpenAI embeddings API.
    #[serde(rename = "openai")]
    OpenAI,
    /// Offline feature hashing.
    #[serde(rename = "hashing")]
    Hashing,
}

/// Configuration for the vector index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Which backend holds the vectors.
    pub backend: IndexBackend,

    /// Namespace name.
    pub name: String,

    /// Similarity metric.
    pub metric: Metric,

    /// File the in-process index is mirrored to. `None` keeps it in memory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Override of the Pinecone control plane URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control_url: Option<String>,

    /// Serverless cloud for a newly created Pinecone index.
    pub cloud: String,

    /// Serverless region for a newly created Pinecone index.
    pub region: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: IndexBackend::Memory,
            name: "newsletters".to_string(),
            metric: Metric::Cosine,
            path: Some(data_dir().join("index.json")),
            control_url: None,
            cloud: "aws".to_string(),
            region: "us-east-1".to_string(),
        }
    }
}

/// Vector index backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexBackend {
    /// In-process index, optionally mirrored to a file.
    Memory,
    /// Pinecone serverless.
    Pinecone,
}

/// Configuration for the document store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Which backend holds document content.
    pub backend: StoreBackend,

    /// Directory for the filesystem backend.
    pub root: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Filesystem,
            root: data_dir().join("documents"),
        }
    }
}

/// Document store backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// One file per document.
    Filesystem,
    /// Process memory only.
    Memory,
}

/// Configuration for answer generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Chat model identifier.
    pub model: String,

    /// Override of the provider's API base URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: "gpt-3.5-turbo".to_string(),
            base_url: None,
        }
    }
}

/// Configuration for batch ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Upper bound on embedding calls in flight for one batch.
    pub max_concurrent_embeddings: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_concurrent_embeddings: 8,
        }
    }
}

/// Deadlines applied to each external call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Embedding calls.
    pub embed_secs: u64,

    /// Index describe, create, upsert and query calls.
    pub index_secs: u64,

    /// Document store reads and writes.
    pub store_secs: u64,

    /// Generation calls.
    pub generate_secs: u64,
}

impl TimeoutConfig {
    pub fn embed(&self) -> Duration {
        Duration::from_secs(self.embed_secs)
    }

    pub fn index(&self) -> Duration {
        Duration::from_secs(self.index_secs)
    }

    pub fn store(&self) -> Duration {
        Duration::from_secs(self.store_secs)
    }

    pub fn generate(&self) -> Duration {
        Duration::from_secs(self.generate_secs)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            embed_secs: 30,
            index_secs: 30,
            store_secs: 10,
            generate_secs: 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_match_the_shipped_index() {
        let config = RetrievalConfig::default();
        assert_eq!(
            config.index_spec(),
            IndexSpec::new("newsletters", 256, Metric::Cosine)
        );
        assert_eq!(config.embedding.model, "text-embedding-3-small");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = RetrievalConfig::from_toml_str(
            r#"
            [embedding]
            provider = "hashing"

            [index]
            backend = "pinecone"
            name = "essays"

            [ingest]
            max_concurrent_embeddings = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.embedding.provider, EmbeddingProviderType::Hashing);
        assert_eq!(config.embedding.dimensions, 256);
        assert_eq!(config.index.backend, IndexBackend::Pinecone);
        assert_eq!(config.index.name, "essays");
        assert_eq!(config.index.metric, Metric::Cosine);
        assert_eq!(config.ingest.max_concurrent_embeddings, 2);
        assert_eq!(config.timeouts, TimeoutConfig::default());
    }

    #[test]
    fn test_rejects_zero_concurrency() {
        let err = RetrievalConfig::from_toml_str("[ingest]\nmax_concurrent_embeddings = 0\n")
            .unwrap_err();
        assert!(matches!(err, RetrievalError::Config(msg) if msg.contains("max_concurrent")));
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let config = RetrievalConfig::default().with_timeouts(TimeoutConfig {
            generate_secs: 0,
            ..TimeoutConfig::default()
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let config = RetrievalConfig::default();
        let rendered = config.to_toml_string().unwrap();
        assert_eq!(RetrievalConfig::from_toml_str(&rendered).unwrap(), config);
    }

    #[test]
    fn test_load_missing_file_is_config_error() {
        let err = RetrievalConfig::load("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, RetrievalError::Config(_)));
    }
}
