//! Question answering over the single most relevant document.
//!
//! Every step depends on the one before it, so they run strictly in order:
//! embed the query, find the nearest document, load its content, generate.

use std::sync::Arc;

use docqa_embeddings::{EmbeddingError, EmbeddingProvider, EmbeddingRequest};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{RetrievalConfig, TimeoutConfig};
use crate::deadline::bounded;
use crate::error::{PipelineStep, Result, RetrievalError, StoreError};
use crate::generator::Generator;
use crate::lifecycle::IndexLifecycle;
use crate::store::DocumentStore;

/// System instruction sent with every generation request.
pub const SYSTEM_PROMPT: &str =
    "You are a helpful assistant. Use only the provided context to answer the user's query.";

/// Build the user message: the full document followed by the question.
pub fn user_prompt(context: &str, query: &str) -> String {
    format!("Context: {context}\n\nQuery: {query}")
}

/// A generated answer and the document it was grounded on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    /// Generated text.
    pub text: String,

    /// Id of the document used as context.
    pub document_id: String,

    /// Similarity between the query and that document.
    pub score: f32,
}

/// Result of a search.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchOutcome {
    /// An answer grounded on the best-matching document.
    Answer(Answer),

    /// The index holds nothing to match against.
    NoResult,
}

/// Answers one query at a time using the nearest ingested document.
pub struct RetrievalPipeline {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn DocumentStore>,
    generator: Arc<dyn Generator>,
    lifecycle: Arc<IndexLifecycle>,
    model: String,
    dimensions: usize,
    timeouts: TimeoutConfig,
}

impl RetrievalPipeline {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn DocumentStore>,
        generator: Arc<dyn Generator>,
        lifecycle: Arc<IndexLifecycle>,
        config: &RetrievalConfig,
    ) -> Self {
        Self {
            embedder,
            store,
            generator,
            lifecycle,
            model: config.embedding.model.clone(),
            dimensions: config.embedding.dimensions,
            timeouts: config.timeouts.clone(),
        }
    }

    /// Answer `query` from the single most similar document.
    pub async fn search(&self, query: &str) -> Result<SearchOutcome> {
        if query.is_empty() {
            return Err(RetrievalError::Input("query is empty".to_string()));
        }
        debug!("Processing query: {query}");

        let vector = self.embed_query(query).await?;

        self.lifecycle.ensure().await?;

        let step = PipelineStep::Query;
        let matches = bounded(
            step,
            self.lifecycle.timeout(),
            self.lifecycle
                .index()
                .query(&self.lifecycle.spec().name, &vector, 1),
            |e| RetrievalError::index(step, e),
        )
        .await?;

        let Some(best) = matches.into_iter().next() else {
            info!("No matching documents found");
            return Ok(SearchOutcome::NoResult);
        };
        debug!("Best match: {} (score {})", best.id, best.score);

        let context = self.fetch_content(&best.id).await?;

        let step = PipelineStep::Generate;
        let text = bounded(
            step,
            self.timeouts.generate(),
            self.generator
                .complete(SYSTEM_PROMPT, &user_prompt(&context, query)),
            RetrievalError::Generation,
        )
        .await?;

        info!("Answered query from {}", best.id);
        Ok(SearchOutcome::Answer(Answer {
            text,
            document_id: best.id,
            score: best.score,
        }))
    }

    /// Embed with the same model and dimension documents were ingested with.
    async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        let request = EmbeddingRequest::new(query)
            .with_model(self.model.clone())
            .with_dimensions(self.dimensions);

        let response = bounded(
            PipelineStep::Embed,
            self.timeouts.embed(),
            self.embedder.embed(request),
            RetrievalError::Embedding,
        )
        .await?;

        if response.embedding.len() != self.dimensions {
            return Err(RetrievalError::Embedding(EmbeddingError::DimensionMismatch {
                expected: self.dimensions,
                actual: response.embedding.len(),
            }));
        }
        Ok(response.embedding)
    }

    /// Load a matched document. Missing content means the index and the
    /// store disagree.
    async fn fetch_content(&self, id: &str) -> Result<String> {
        let step = PipelineStep::Fetch;
        let bytes = bounded(step, self.timeouts.store(), self.store.get(id), |e| {
            RetrievalError::store(step, e)
        })
        .await?
        .ok_or_else(|| RetrievalError::Consistency { id: id.to_string() })?;

        String::from_utf8(bytes)
            .map_err(|_| RetrievalError::store(step, StoreError::InvalidUtf8(id.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_user_prompt_embeds_context_and_query_verbatim() {
        let prompt = user_prompt("line one\nline two", "what is this?");
        assert_eq!(prompt, "Context: line one\nline two\n\nQuery: what is this?");
    }
}
