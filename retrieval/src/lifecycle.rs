//! Lazy, idempotent creation of the index namespace.

use std::sync::Arc;
use std::time::Duration;

use docqa_embeddings::{IndexError, IndexSpec, VectorIndex};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::deadline::bounded;
use crate::error::{PipelineStep, Result, RetrievalError};

/// Owns the index handle and the fixed spec of the namespace both
/// pipelines use.
///
/// [`ensure`](Self::ensure) runs describe-then-create once per process.
/// A create that loses a race against another creator is treated as
/// success. An existing namespace with a different dimension or metric is
/// an error: mixing embedding spaces would make scores meaningless.
pub struct IndexLifecycle {
    index: Arc<dyn VectorIndex>,
    spec: IndexSpec,
    timeout: Duration,
    ready: OnceCell<()>,
}

impl IndexLifecycle {
    pub fn new(index: Arc<dyn VectorIndex>, spec: IndexSpec, timeout: Duration) -> Self {
        Self {
            index,
            spec,
            timeout,
            ready: OnceCell::new(),
        }
    }

    /// The index handle.
    pub fn index(&self) -> &dyn VectorIndex {
        self.index.as_ref()
    }

    /// The namespace spec.
    pub fn spec(&self) -> &IndexSpec {
        &self.spec
    }

    /// Per-call deadline for index operations.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Make sure the namespace exists with the expected spec.
    pub async fn ensure(&self) -> Result<()> {
        self.ready
            .get_or_try_init(|| self.check_or_create())
            .await
            .map(|_| ())
    }

    async fn check_or_create(&self) -> Result<()> {
        let step = PipelineStep::EnsureIndex;
        let wrap = |e| RetrievalError::index(step, e);

        let existing = bounded(
            step,
            self.timeout,
            self.index.describe_index(&self.spec.name),
            wrap,
        )
        .await?;

        if let Some(found) = existing {
            if let Some(detail) = self.spec.mismatch(&found) {
                return Err(wrap(IndexError::SpecMismatch {
                    name: self.spec.name.clone(),
                    detail,
                }));
            }
            debug!("Index '{}' already exists", self.spec.name);
            return Ok(());
        }

        match bounded(step, self.timeout, self.index.create_index(&self.spec), wrap).await {
            Ok(()) => {
                info!(
                    "Index '{}' created on {}",
                    self.spec.name,
                    self.index.backend()
                );
                Ok(())
            }
            Err(RetrievalError::Index {
                source: IndexError::AlreadyExists(_),
                ..
            }) => {
                debug!("Index '{}' was created concurrently", self.spec.name);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use docqa_embeddings::{IndexResult, MemoryVectorIndex, Metric, SimilarityResult, VectorRecord};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn spec() -> IndexSpec {
        IndexSpec::new("newsletters", 4, Metric::Cosine)
    }

    /// Reports the index as missing, then loses the creation race.
    #[derive(Default)]
    struct RacingIndex {
        creates: AtomicUsize,
    }

    #[async_trait]
    impl VectorIndex for RacingIndex {
        fn backend(&self) -> &str {
            "racing"
        }

        async fn describe_index(&self, _name: &str) -> IndexResult<Option<IndexSpec>> {
            Ok(None)
        }

        async fn create_index(&self, spec: &IndexSpec) -> IndexResult<()> {
            self.creates.fetch_add(1, Ordering::SeqCst);
            Err(IndexError::AlreadyExists(spec.name.clone()))
        }

        async fn upsert(&self, _name: &str, records: Vec<VectorRecord>) -> IndexResult<usize> {
            Ok(records.len())
        }

        async fn query(
            &self,
            _name: &str,
            _vector: &[f32],
            _top_k: usize,
        ) -> IndexResult<Vec<SimilarityResult>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_ensure_creates_once() {
        let index = Arc::new(MemoryVectorIndex::new());
        let lifecycle = IndexLifecycle::new(index.clone(), spec(), Duration::from_secs(5));

        lifecycle.ensure().await.unwrap();
        lifecycle.ensure().await.unwrap();

        assert_eq!(index.describe_index("newsletters").await.unwrap(), Some(spec()));
    }

    #[tokio::test]
    async fn test_ensure_is_a_noop_when_index_exists() {
        let index = Arc::new(MemoryVectorIndex::new());
        index.create_index(&spec()).await.unwrap();

        let lifecycle = IndexLifecycle::new(index, spec(), Duration::from_secs(5));
        lifecycle.ensure().await.unwrap();
    }

    #[tokio::test]
    async fn test_lost_creation_race_is_swallowed() {
        let index = Arc::new(RacingIndex::default());
        let lifecycle = IndexLifecycle::new(index.clone(), spec(), Duration::from_secs(5));

        lifecycle.ensure().await.unwrap();
        lifecycle.ensure().await.unwrap();

        assert_eq!(index.creates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_existing_index_with_other_dimension_is_rejected() {
        let index = Arc::new(MemoryVectorIndex::new());
        index
            .create_index(&IndexSpec::new("newsletters", 8, Metric::Cosine))
            .await
            .unwrap();

        let lifecycle = IndexLifecycle::new(index, spec(), Duration::from_secs(5));
        let err = lifecycle.ensure().await.unwrap_err();

        assert_eq!(err.step(), Some(PipelineStep::EnsureIndex));
        assert!(matches!(
            err,
            RetrievalError::Index {
                source: IndexError::SpecMismatch { .. },
                ..
            }
        ));
    }
}
