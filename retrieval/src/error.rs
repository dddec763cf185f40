//! Error types for ingestion and retrieval.

use std::fmt;
use std::time::Duration;

use docqa_embeddings::{EmbeddingError, IndexError};
use thiserror::Error;

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, RetrievalError>;

/// Result type alias for document store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Result type alias for generation calls.
pub type GenerationResult<T> = std::result::Result<T, GenerationError>;

/// The pipeline step an external call belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStep {
    /// Embedding a document or a query.
    Embed,
    /// Checking for or creating the index namespace.
    EnsureIndex,
    /// Writing vectors to the index.
    Upsert,
    /// Writing document content to the store.
    Persist,
    /// Nearest-neighbour lookup.
    Query,
    /// Reading matched content from the store.
    Fetch,
    /// Producing the answer.
    Generate,
}

impl fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStep::Embed => "embed",
            PipelineStep::EnsureIndex => "ensure-index",
            PipelineStep::Upsert => "upsert",
            PipelineStep::Persist => "persist",
            PipelineStep::Query => "query",
            PipelineStep::Fetch => "fetch",
            PipelineStep::Generate => "generate",
        };
        f.write_str(name)
    }
}

/// Errors surfaced by the ingestion and retrieval pipelines.
///
/// A search that finds nothing is not an error; see
/// [`SearchOutcome::NoResult`](crate::SearchOutcome::NoResult).
#[derive(Error, Debug)]
pub enum RetrievalError {
    /// The caller's input was rejected before any external call.
    #[error("invalid input: {0}")]
    Input(String),

    /// The embedder failed.
    #[error("embedding failed: {0}")]
    Embedding(#[source] EmbeddingError),

    /// The vector index failed.
    #[error("vector index failed during {step}: {source}")]
    Index {
        step: PipelineStep,
        #[source]
        source: IndexError,
    },

    /// The document store failed.
    #[error("document store failed during {step}: {source}")]
    Store {
        step: PipelineStep,
        #[source]
        source: StoreError,
    },

    /// The index matched an id the document store has no content for.
    #[error("index and document store diverged: no content for indexed id {id}")]
    Consistency { id: String },

    /// The generator failed.
    #[error("generation failed: {0}")]
    Generation(#[from] GenerationError),

    /// An external call exceeded its deadline.
    #[error("{step} timed out after {timeout:?}")]
    Timeout { step: PipelineStep, timeout: Duration },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl RetrievalError {
    pub(crate) fn index(step: PipelineStep, source: IndexError) -> Self {
        Self::Index { step, source }
    }

    pub(crate) fn store(step: PipelineStep, source: StoreError) -> Self {
        Self::Store { step, source }
    }

    /// The step that failed, if the failure came from an external call.
    pub fn step(&self) -> Option<PipelineStep> {
        match self {
            Self::Input(_) | Self::Config(_) => None,
            Self::Embedding(_) => Some(PipelineStep::Embed),
            Self::Index { step, .. } | Self::Store { step, .. } | Self::Timeout { step, .. } => {
                Some(*step)
            }
            Self::Consistency { .. } => Some(PipelineStep::Fetch),
            Self::Generation(_) => Some(PipelineStep::Generate),
        }
    }
}

/// Document store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The id cannot be used as a storage key.
    #[error("invalid document id: {0:?}")]
    InvalidKey(String),

    /// Stored content is not valid UTF-8.
    #[error("content of {0} is not valid UTF-8")]
    InvalidUtf8(String),

    /// Failed to read a document.
    #[error("failed to read {id}: {source}")]
    Read {
        id: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to write a document.
    #[error("failed to write {id}: {source}")]
    Write {
        id: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to delete a document.
    #[error("failed to delete {id}: {source}")]
    Delete {
        id: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to create the storage directory.
    #[error("failed to create directory: {0}")]
    CreateDirectory(String),
}

/// Generation errors.
#[derive(Error, Debug)]
pub enum GenerationError {
    /// Provider not configured.
    #[error("generation provider not configured")]
    ProviderNotConfigured,

    /// API request failed.
    #[error("API request failed: {0}")]
    ApiRequest(String),

    /// Rate limit or quota exceeded.
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Invalid response from provider.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// HTTP error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_step_identifies_failing_call() {
        let err = RetrievalError::index(
            PipelineStep::Upsert,
            IndexError::NotFound("newsletters".to_string()),
        );
        assert_eq!(err.step(), Some(PipelineStep::Upsert));
        assert_eq!(
            err.to_string(),
            "vector index failed during upsert: index not found: newsletters"
        );

        let err = RetrievalError::Consistency {
            id: "a.txt".to_string(),
        };
        assert_eq!(err.step(), Some(PipelineStep::Fetch));

        assert_eq!(RetrievalError::Input("empty".to_string()).step(), None);
    }

    #[test]
    fn test_timeout_message() {
        let err = RetrievalError::Timeout {
            step: PipelineStep::Generate,
            timeout: Duration::from_secs(60),
        };
        assert_eq!(err.to_string(), "generate timed out after 60s");
    }
}
