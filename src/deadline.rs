//! Per-call deadlines for external collaborators.
//!
//! Every call that leaves the process (embedding, vector search, metadata
//! fetch, reranker inference, text generation) goes through [`within`], so a
//! slow collaborator fails only the query that issued the call.

use crate::error::{LecternError, Result, Service};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Run `fut` with a deadline, mapping an elapsed deadline to
/// [`LecternError::Timeout`] for `service`.
pub async fn within<T, F>(service: Service, after: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!("{} call exceeded {:?}", service, after);
            Err(LecternError::Timeout { service, after })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_within_passes_result_through() {
        let value = within(Service::Embedding, Duration::from_secs(1), async { Ok(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_within_times_out() {
        let result: Result<()> = within(Service::Reranker, Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        match result {
            Err(LecternError::Timeout { service, .. }) => assert_eq!(service, Service::Reranker),
            other => panic!("expected timeout, got {:?}", other),
        }
    }
}
