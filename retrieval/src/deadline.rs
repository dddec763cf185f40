//! Per-call deadlines for external services.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::{PipelineStep, Result, RetrievalError};

/// Run one external call, failing with [`RetrievalError::Timeout`] if it
/// does not finish within `limit`.
pub(crate) async fn bounded<T, E>(
    step: PipelineStep,
    limit: Duration,
    call: impl Future<Output = std::result::Result<T, E>>,
    wrap: impl FnOnce(E) -> RetrievalError,
) -> Result<T> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result.map_err(wrap),
        Err(_) => {
            warn!("{step} call exceeded {limit:?}");
            Err(RetrievalError::Timeout {
                step,
                timeout: limit,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GenerationError;

    #[tokio::test(start_paused = true)]
    async fn test_slow_call_times_out() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, GenerationError>("late")
        };

        let err = bounded(
            PipelineStep::Generate,
            Duration::from_secs(1),
            slow,
            RetrievalError::Generation,
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            RetrievalError::Timeout {
                step: PipelineStep::Generate,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_call_error_is_wrapped() {
        let failing = async { Err::<(), _>(GenerationError::ProviderNotConfigured) };

        let err = bounded(
            PipelineStep::Generate,
            Duration::from_secs(1),
            failing,
            RetrievalError::Generation,
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            RetrievalError::Generation(GenerationError::ProviderNotConfigured)
        ));
    }
}
