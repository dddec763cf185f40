//! # Embeddings
//!
//! This crate provides embedding generation and the vector index used by
//! docqa to find the document most relevant to a question.
//!
//! ## Features
//!
//! - **Embedding Generation**: Convert text to fixed-length vectors
//! - **Vector Index**: Named namespaces of vectors keyed by document id
//! - **Similarity Search**: Top-K nearest neighbours by cosine similarity
//! - **Multiple Backends**: OpenAI or offline hashing embeddings, in-process
//!   or Pinecone indexes
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Embeddings System                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  EmbeddingProvider ──► Embedding ──► VectorIndex               │
//! │       │                                   │                     │
//! │       ▼                                   ▼                     │
//! │  OpenAI/Hashing              MemoryVectorIndex/PineconeIndex   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod index;
pub mod pinecone;
pub mod provider;
pub mod similarity;

pub use error::{EmbeddingError, IndexError, IndexResult, Result};
pub use index::{IndexSpec, MemoryVectorIndex, SimilarityIndex, VectorIndex, VectorRecord};
pub use pinecone::PineconeIndex;
pub use provider::{
    EmbeddingProvider, EmbeddingRequest, EmbeddingResponse, HashingProvider, OpenAIProvider,
};
pub use similarity::{Metric, SimilarityResult, cosine_similarity};

/// A dense vector embedding.
pub type Embedding = Vec<f32>;

/// Dimension of document embeddings.
pub const DEFAULT_DIMENSION: usize = 256;

/// Embedding model used for both documents and queries.
pub const DEFAULT_MODEL: &str = "text-embedding-3-small";
