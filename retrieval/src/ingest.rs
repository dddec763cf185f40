//! Batch ingestion: embed, ensure the index, persist content, upsert vectors.
//!
//! A batch either lands completely or not at all. Embeddings are computed
//! before anything is written, so an embedding failure leaves no trace.
//! Content is persisted before vectors are upserted, so a vector never
//! becomes visible ahead of its text. If persisting or upserting fails,
//! every document already written is put back to what it was before the
//! batch started, unless a later writer has replaced it since.
//!
//! The write phase (persist through upsert) of concurrent batches is
//! serialised, so one batch's rollback cannot undo another's write.

use std::collections::HashSet;
use std::sync::Arc;

use docqa_embeddings::{EmbeddingError, EmbeddingProvider, EmbeddingRequest, VectorRecord};
use futures::{StreamExt, stream};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::{RetrievalConfig, TimeoutConfig};
use crate::deadline::bounded;
use crate::error::{PipelineStep, Result, RetrievalError};
use crate::lifecycle::IndexLifecycle;
use crate::store::DocumentStore;

/// A named plain-text document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Stable name, unique across the store and the index.
    pub id: String,

    /// Raw text.
    pub content: String,
}

impl Document {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
        }
    }
}

/// Content an id held before the current batch wrote it.
struct Snapshot<'a> {
    id: &'a str,
    written: &'a [u8],
    previous: Option<Vec<u8>>,
}

/// Turns batches of documents into stored content plus indexed vectors.
pub struct IngestionPipeline {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn DocumentStore>,
    lifecycle: Arc<IndexLifecycle>,
    model: String,
    dimensions: usize,
    max_concurrency: usize,
    timeouts: TimeoutConfig,
    write_lock: Mutex<()>,
}

impl IngestionPipeline {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn DocumentStore>,
        lifecycle: Arc<IndexLifecycle>,
        config: &RetrievalConfig,
    ) -> Self {
        Self {
            embedder,
            store,
            lifecycle,
            model: config.embedding.model.clone(),
            dimensions: config.embedding.dimensions,
            max_concurrency: config.ingest.max_concurrent_embeddings.max(1),
            timeouts: config.timeouts.clone(),
            write_lock: Mutex::new(()),
        }
    }

    /// Ingest a batch. Returns the ingested ids in input order.
    ///
    /// Re-ingesting an id replaces both its content and its vector.
    pub async fn ingest(&self, documents: Vec<Document>) -> Result<Vec<String>> {
        validate_batch(&documents)?;
        info!("Ingesting batch of {} documents", documents.len());

        let records = self.embed_all(&documents).await?;
        debug!("Embedded {} documents", records.len());

        self.lifecycle.ensure().await?;

        {
            let _writing = self.write_lock.lock().await;
            let snapshots = self.persist_all(&documents).await?;

            if let Err(e) = self.upsert(records).await {
                error!("Upsert failed, rolling back stored content: {e}");
                self.restore(&snapshots).await;
                return Err(e);
            }
        }

        let ids: Vec<String> = documents.into_iter().map(|d| d.id).collect();
        info!("Ingested {} documents", ids.len());
        Ok(ids)
    }

    /// Embed every document with at most `max_concurrency` calls in flight.
    ///
    /// The first failure drops the remaining calls and fails the batch.
    async fn embed_all(&self, documents: &[Document]) -> Result<Vec<VectorRecord>> {
        let mut pending = stream::iter(documents.iter().cloned().enumerate())
            .map(|(position, document)| async move {
                self.embed_one(document)
                    .await
                    .map(|values| (position, values))
            })
            .buffer_unordered(self.max_concurrency);

        let mut vectors = vec![None; documents.len()];
        while let Some(result) = pending.next().await {
            let (position, values) = result?;
            vectors[position] = Some(values);
        }

        Ok(documents
            .iter()
            .zip(vectors)
            .filter_map(|(document, values)| {
                values.map(|values| VectorRecord::new(document.id.clone(), values))
            })
            .collect())
    }

    async fn embed_one(&self, document: Document) -> Result<Vec<f32>> {
        let request = EmbeddingRequest::new(document.content)
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

        debug!("Embedded document {}", document.id);
        Ok(response.embedding)
    }

    /// Write content for every document, recording what each id held before.
    async fn persist_all<'a>(&self, documents: &'a [Document]) -> Result<Vec<Snapshot<'a>>> {
        let step = PipelineStep::Persist;
        let limit = self.timeouts.store();
        let wrap = |e| RetrievalError::store(step, e);

        let mut snapshots: Vec<Snapshot> = Vec::with_capacity(documents.len());
        for document in documents {
            let previous = match bounded(step, limit, self.store.get(&document.id), wrap).await {
                Ok(previous) => previous,
                Err(e) => {
                    self.restore(&snapshots).await;
                    return Err(e);
                }
            };
            snapshots.push(Snapshot {
                id: &document.id,
                written: document.content.as_bytes(),
                previous,
            });

            let write = self.store.put(&document.id, document.content.as_bytes());
            if let Err(e) = bounded(step, limit, write, wrap).await {
                error!("Persisting {} failed, rolling back batch: {e}", document.id);
                self.restore(&snapshots).await;
                return Err(e);
            }
        }

        Ok(snapshots)
    }

    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<()> {
        let step = PipelineStep::Upsert;
        let name = &self.lifecycle.spec().name;

        let count = bounded(
            step,
            self.lifecycle.timeout(),
            self.lifecycle.index().upsert(name, records),
            |e| RetrievalError::index(step, e),
        )
        .await?;

        debug!("Upserted {count} vectors into {name}");
        Ok(())
    }

    /// Put every snapshotted id back to its previous content.
    ///
    /// An id is only reverted while it still holds what this batch wrote;
    /// content replaced by another writer is left alone. Failures are
    /// logged; the error that triggered the rollback is the one reported to
    /// the caller.
    async fn restore(&self, snapshots: &[Snapshot<'_>]) {
        if snapshots.is_empty() {
            return;
        }

        let step = PipelineStep::Persist;
        let limit = self.timeouts.store();
        let wrap = |e| RetrievalError::store(step, e);

        let mut restored = 0;
        let mut failed = Vec::new();
        for snapshot in snapshots.iter().rev() {
            let current = match bounded(step, limit, self.store.get(snapshot.id), wrap).await {
                Ok(current) => current,
                Err(e) => {
                    error!("Failed to read back document {}: {e}", snapshot.id);
                    failed.push(snapshot.id);
                    continue;
                }
            };
            if current.as_deref() != Some(snapshot.written) {
                warn!(
                    "Document {} changed since this batch wrote it, not rolling back",
                    snapshot.id
                );
                continue;
            }

            let outcome = match &snapshot.previous {
                Some(content) => {
                    bounded(step, limit, self.store.put(snapshot.id, content), wrap).await
                }
                None => bounded(step, limit, self.store.delete(snapshot.id), wrap).await,
            };
            match outcome {
                Ok(()) => restored += 1,
                Err(e) => {
                    error!("Failed to roll back document {}: {e}", snapshot.id);
                    failed.push(snapshot.id);
                }
            }
        }

        if failed.is_empty() {
            warn!("Rolled back {restored} documents");
        } else {
            error!(
                "Rollback incomplete; documents left in an unknown state: {}",
                failed.join(", ")
            );
        }
    }
}

fn validate_batch(documents: &[Document]) -> Result<()> {
    if documents.is_empty() {
        return Err(RetrievalError::Input("no documents to ingest".to_string()));
    }

    let mut seen = HashSet::with_capacity(documents.len());
    for document in documents {
        if document.id.trim().is_empty() {
            return Err(RetrievalError::Input("document id is empty".to_string()));
        }
        if document.content.is_empty() {
            return Err(RetrievalError::Input(format!(
                "document {} has no content",
                document.id
            )));
        }
        if !seen.insert(document.id.as_str()) {
            return Err(RetrievalError::Input(format!(
                "duplicate document id in batch: {}",
                document.id
            )));
        }
    }
    Ok(())
}
