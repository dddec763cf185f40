//! The docqa engine: both pipelines over one set of service handles.

use std::sync::Arc;

use docqa_embeddings::{
    EmbeddingProvider, HashingProvider, IndexError, MemoryVectorIndex, OpenAIProvider,
    PineconeIndex, VectorIndex,
};
use tracing::info;

use crate::config::{EmbeddingProviderType, IndexBackend, RetrievalConfig, StoreBackend};
use crate::error::{Result, RetrievalError};
use crate::generator::{Generator, OpenAIChatGenerator};
use crate::ingest::{Document, IngestionPipeline};
use crate::lifecycle::IndexLifecycle;
use crate::search::{RetrievalPipeline, SearchOutcome};
use crate::store::{DocumentStore, FsDocumentStore, MemoryDocumentStore};

/// Ingests documents and answers questions about them.
///
/// This is the surface a transport layer calls: `ingest` for a batch of
/// named texts, `search` for a question.
pub struct DocumentQa {
    config: RetrievalConfig,
    ingestion: IngestionPipeline,
    retrieval: RetrievalPipeline,
}

impl DocumentQa {
    /// Create a new engine builder.
    pub fn builder() -> DocumentQaBuilder {
        DocumentQaBuilder::new()
    }

    /// Build an engine whose services all come from `config`.
    pub async fn from_config(config: RetrievalConfig) -> Result<Self> {
        Self::builder().with_config(config).build().await
    }

    /// The configuration the engine was built with.
    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Ingest a batch of documents. All or nothing.
    pub async fn ingest(&self, documents: Vec<Document>) -> Result<Vec<String>> {
        self.ingestion.ingest(documents).await
    }

    /// Answer a question from the most relevant ingested document.
    pub async fn search(&self, query: &str) -> Result<SearchOutcome> {
        self.retrieval.search(query).await
    }
}

/// Builder for [`DocumentQa`].
///
/// Any service not supplied explicitly is constructed from the config.
pub struct DocumentQaBuilder {
    config: RetrievalConfig,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    index: Option<Arc<dyn VectorIndex>>,
    store: Option<Arc<dyn DocumentStore>>,
    generator: Option<Arc<dyn Generator>>,
}

impl DocumentQaBuilder {
    /// Create a new builder with the default configuration.
    pub fn new() -> Self {
        Self {
            config: RetrievalConfig::default(),
            embedder: None,
            index: None,
            store: None,
            generator: None,
        }
    }

    /// Set the configuration.
    pub fn with_config(mut self, config: RetrievalConfig) -> Self {
        self.config = config;
        self
    }

    /// Use this embedder.
    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Use this vector index.
    pub fn with_index(mut self, index: Arc<dyn VectorIndex>) -> Self {
        self.index = Some(index);
        self
    }

    /// Use this document store.
    pub fn with_store(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use this generator.
    pub fn with_generator(mut self, generator: Arc<dyn Generator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Build the engine.
    pub async fn build(self) -> Result<DocumentQa> {
        let config = self.config;
        config.validate()?;

        let embedder = match self.embedder {
            Some(embedder) => embedder,
            None => embedder_from_config(&config)?,
        };
        let index = match self.index {
            Some(index) => index,
            None => index_from_config(&config).await?,
        };
        let store = match self.store {
            Some(store) => store,
            None => store_from_config(&config).await?,
        };
        let generator = match self.generator {
            Some(generator) => generator,
            None => generator_from_config(&config)?,
        };

        info!(
            "Initializing docqa: embedder {}, index {}, store {}, generator {}",
            embedder.name(),
            index.backend(),
            store.backend(),
            generator.name()
        );

        let lifecycle = Arc::new(IndexLifecycle::new(
            index,
            config.index_spec(),
            config.timeouts.index(),
        ));
        let ingestion = IngestionPipeline::new(
            Arc::clone(&embedder),
            Arc::clone(&store),
            Arc::clone(&lifecycle),
            &config,
        );
        let retrieval = RetrievalPipeline::new(embedder, store, generator, lifecycle, &config);

        Ok(DocumentQa {
            config,
            ingestion,
            retrieval,
        })
    }
}

impl Default for DocumentQaBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn embedder_from_config(config: &RetrievalConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    let embedding = &config.embedding;
    match embedding.provider {
        EmbeddingProviderType::OpenAI => {
            let mut provider = OpenAIProvider::new()
                .with_model(embedding.model.clone())
                .with_timeout(config.timeouts.embed())
                .map_err(RetrievalError::Embedding)?;
            if let Some(url) = &embedding.base_url {
                provider = provider.with_base_url(url.clone());
            }
            Ok(Arc::new(provider))
        }
        EmbeddingProviderType::Hashing => {
            Ok(Arc::new(HashingProvider::new(embedding.dimensions)))
        }
    }
}

async fn index_from_config(config: &RetrievalConfig) -> Result<Arc<dyn VectorIndex>> {
    let wrap = |e: IndexError| RetrievalError::Config(format!("vector index: {e}"));
    let index = &config.index;
    match index.backend {
        IndexBackend::Memory => match &index.path {
            Some(path) => Ok(Arc::new(
                MemoryVectorIndex::with_persistence(path)
                    .await
                    .map_err(wrap)?,
            )),
            None => Ok(Arc::new(MemoryVectorIndex::new())),
        },
        IndexBackend::Pinecone => {
            let mut client = PineconeIndex::new()
                .with_serverless(index.cloud.clone(), index.region.clone())
                .with_timeout(config.timeouts.index())
                .map_err(wrap)?;
            if let Some(url) = &index.control_url {
                client = client.with_control_url(url.clone());
            }
            Ok(Arc::new(client))
        }
    }
}

async fn store_from_config(config: &RetrievalConfig) -> Result<Arc<dyn DocumentStore>> {
    match config.store.backend {
        StoreBackend::Filesystem => {
            let store = FsDocumentStore::new(&config.store.root)
                .await
                .map_err(|e| RetrievalError::Config(format!("document store: {e}")))?;
            Ok(Arc::new(store))
        }
        StoreBackend::Memory => Ok(Arc::new(MemoryDocumentStore::new())),
    }
}

fn generator_from_config(config: &RetrievalConfig) -> Result<Arc<dyn Generator>> {
    let generation = &config.generation;
    let mut generator = OpenAIChatGenerator::new()
        .with_model(generation.model.clone())
        .with_timeout(config.timeouts.generate())?;
    if let Some(url) = &generation.base_url {
        generator = generator.with_base_url(url.clone());
    }
    Ok(Arc::new(generator))
}
