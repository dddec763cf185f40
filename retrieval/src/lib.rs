//! # Retrieval
//!
//! Document ingestion and retrieval-augmented answering.
//!
//! Two pipelines share one set of service handles:
//!
//! ```text
//! ingest:  documents ──► embed (bounded fan-out) ──► ensure index
//!                        ──► persist content ──► upsert vectors
//!
//! search:  query ──► embed ──► ensure index ──► top-1 match
//!                    ──► fetch content ──► generate answer
//! ```
//!
//! The embedder and vector index come from `docqa-embeddings`; the
//! document store and generator live here.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use docqa_retrieval::{Document, DocumentQa, RetrievalConfig, SearchOutcome};
//!
//! let engine = DocumentQa::from_config(RetrievalConfig::default()).await?;
//! engine.ingest(vec![Document::new("issue-42.txt", text)]).await?;
//!
//! match engine.search("What changed in the release?").await? {
//!     SearchOutcome::Answer(answer) => println!("{}", answer.text),
//!     SearchOutcome::NoResult => println!("nothing ingested yet"),
//! }
//! ```

pub mod config;
mod deadline;
pub mod engine;
pub mod error;
pub mod generator;
pub mod ingest;
pub mod lifecycle;
pub mod search;
pub mod store;

pub use config::{
    EmbeddingConfig, EmbeddingProviderType, GenerationConfig, IndexBackend, IndexConfig,
    IngestConfig, RetrievalConfig, StoreBackend, StoreConfig, TimeoutConfig,
};
pub use engine::{DocumentQa, DocumentQaBuilder};
pub use error::{
    GenerationError, GenerationResult, PipelineStep, Result, RetrievalError, StoreError,
    StoreResult,
};
pub use generator::{Generator, OpenAIChatGenerator};
pub use ingest::{Document, IngestionPipeline};
pub use lifecycle::IndexLifecycle;
pub use search::{Answer, RetrievalPipeline, SYSTEM_PROMPT, SearchOutcome, user_prompt};
pub use store::{DocumentStore, FsDocumentStore, MemoryDocumentStore};
