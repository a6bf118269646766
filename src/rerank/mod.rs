//! Second-stage reranking of fused candidates.
//!
//! A [`RelevanceModel`] scores each (query, chunk text) pair jointly. The
//! [`Reranker`] batches those calls, orders candidates by the new score and
//! keeps the best `final_top_k`.

mod http;
mod overlap;

pub use http::HttpRelevanceModel;
pub use overlap::TermOverlapModel;

use crate::config::{RerankProvider, RerankSettings};
use crate::deadline;
use crate::error::{LecternError, Result, Service};
use crate::retrieval::RetrievalCandidate;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Joint query-document relevance scoring.
#[async_trait]
pub trait RelevanceModel: Send + Sync {
    /// One score per text, in input order. Higher is more relevant.
    async fn score(&self, query: &str, texts: &[String]) -> Result<Vec<f32>>;

    /// Model name, for logging.
    fn name(&self) -> &str;
}

/// Build the relevance model named in settings.
pub fn create_model(settings: &RerankSettings) -> Result<Arc<dyn RelevanceModel>> {
    Ok(match settings.provider {
        RerankProvider::Http => Arc::new(HttpRelevanceModel::new(&settings.endpoint, settings.timeout())?),
        RerankProvider::Overlap => Arc::new(TermOverlapModel),
    })
}

/// Reranking tunables.
#[derive(Debug, Clone)]
pub struct RerankConfig {
    pub enabled: bool,
    pub batch_size: usize,
    pub final_top_k: usize,
    /// Deadline for one batch.
    pub timeout: Duration,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            batch_size: 32,
            final_top_k: 10,
            timeout: Duration::from_secs(30),
        }
    }
}

impl From<&RerankSettings> for RerankConfig {
    fn from(settings: &RerankSettings) -> Self {
        Self {
            enabled: settings.enabled,
            batch_size: settings.batch_size.max(1),
            final_top_k: settings.final_top_k,
            timeout: settings.timeout(),
        }
    }
}

/// Reorders candidates with a [`RelevanceModel`].
pub struct Reranker {
    model: Arc<dyn RelevanceModel>,
    config: RerankConfig,
}

impl Reranker {
    pub fn new(model: Arc<dyn RelevanceModel>, config: RerankConfig) -> Self {
        Self { model, config }
    }

    pub fn config(&self) -> &RerankConfig {
        &self.config
    }

    /// The same model with different tunables.
    pub fn with_config(&self, config: RerankConfig) -> Self {
        Self {
            model: self.model.clone(),
            config,
        }
    }

    /// Rerank `candidates` and keep the best `final_top_k`.
    ///
    /// When reranking is disabled, or there are already no more than
    /// `final_top_k` candidates, the fused order is kept and no
    /// `rerank_score` is set.
    #[instrument(skip(self, candidates), fields(count = candidates.len()))]
    pub async fn rerank(
        &self,
        query: &str,
        mut candidates: Vec<RetrievalCandidate>,
    ) -> Result<Vec<RetrievalCandidate>> {
        let top_k = self.config.final_top_k;

        if !self.config.enabled || candidates.len() <= top_k {
            debug!("Skipping rerank for {} candidates", candidates.len());
            candidates.truncate(top_k);
            return Ok(candidates);
        }

        let texts: Vec<String> = candidates
            .iter()
            .map(|c| c.metadata.raw_text.clone())
            .collect();

        let mut scores = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.config.batch_size.max(1)) {
            let batch_scores = deadline::within(
                Service::Reranker,
                self.config.timeout,
                self.model.score(query, batch),
            )
            .await?;

            if batch_scores.len() != batch.len() {
                return Err(LecternError::upstream(
                    Service::Reranker,
                    format!("expected {} scores, got {}", batch.len(), batch_scores.len()),
                ));
            }
            scores.extend(batch_scores);
        }

        for (candidate, score) in candidates.iter_mut().zip(scores) {
            candidate.rerank_score = Some(score);
        }

        // Stable: equal rerank scores keep fused order.
        candidates.sort_by(|a, b| {
            let a = a.rerank_score.unwrap_or(f32::NEG_INFINITY);
            let b = b.rerank_score.unwrap_or(f32::NEG_INFINITY);
            b.total_cmp(&a)
        });
        candidates.truncate(top_k);

        info!(
            "Reranked with {} and kept {} candidates",
            self.model.name(),
            candidates.len()
        );
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::test_candidate;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Scores each text by the number parsed from it, recording batch sizes.
    #[derive(Default)]
    struct NumericModel {
        batches: Mutex<Vec<usize>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RelevanceModel for NumericModel {
        async fn score(&self, _query: &str, texts: &[String]) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.batches.lock().unwrap().push(texts.len());
            Ok(texts.iter().map(|t| t.parse::<f32>().unwrap_or(0.0)).collect())
        }

        fn name(&self) -> &str {
            "numeric"
        }
    }

    struct ShortModel;

    #[async_trait]
    impl RelevanceModel for ShortModel {
        async fn score(&self, _query: &str, _texts: &[String]) -> Result<Vec<f32>> {
            Ok(vec![1.0])
        }

        fn name(&self) -> &str {
            "short"
        }
    }

    struct StalledModel;

    #[async_trait]
    impl RelevanceModel for StalledModel {
        async fn score(&self, _query: &str, _texts: &[String]) -> Result<Vec<f32>> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(Vec::new())
        }

        fn name(&self) -> &str {
            "stalled"
        }
    }

    fn candidates(scores: &[&str]) -> Vec<RetrievalCandidate> {
        scores
            .iter()
            .enumerate()
            .map(|(i, s)| test_candidate(&format!("c{}", i), 1.0 / (61.0 + i as f64), s))
            .collect()
    }

    fn config(final_top_k: usize, batch_size: usize) -> RerankConfig {
        RerankConfig {
            final_top_k,
            batch_size,
            ..RerankConfig::default()
        }
    }

    #[tokio::test]
    async fn test_skip_when_within_final_top_k() {
        let model = Arc::new(NumericModel::default());
        let reranker = Reranker::new(model.clone(), config(10, 32));

        let input = candidates(&["0.1", "0.9", "0.5"]);
        let output = reranker.rerank("q", input.clone()).await.unwrap();

        assert_eq!(output, input);
        assert!(output.iter().all(|c| c.rerank_score.is_none()));
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_disabled_truncates_in_fused_order() {
        let model = Arc::new(NumericModel::default());
        let reranker = Reranker::new(
            model.clone(),
            RerankConfig {
                enabled: false,
                ..config(2, 32)
            },
        );

        let output = reranker.rerank("q", candidates(&["0.1", "0.9", "0.5"])).await.unwrap();

        let ids: Vec<_> = output.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["c0", "c1"]);
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_reorders_by_rerank_score_in_batches() {
        let model = Arc::new(NumericModel::default());
        let reranker = Reranker::new(model.clone(), config(3, 2));

        let output = reranker
            .rerank("q", candidates(&["0.1", "0.9", "0.5", "0.7", "0.2"]))
            .await
            .unwrap();

        let ids: Vec<_> = output.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c3", "c2"]);
        assert_eq!(output[0].rerank_score, Some(0.9));
        assert_eq!(output[0].relevance(), 0.9f32 as f64);
        assert_eq!(*model.batches.lock().unwrap(), vec![2, 2, 1]);
    }

    #[tokio::test]
    async fn test_equal_scores_keep_fused_order() {
        let reranker = Reranker::new(Arc::new(NumericModel::default()), config(2, 32));
        let output = reranker
            .rerank("q", candidates(&["0.5", "0.5", "0.5"]))
            .await
            .unwrap();
        let ids: Vec<_> = output.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["c0", "c1"]);
    }

    #[tokio::test]
    async fn test_score_count_mismatch_is_error() {
        let reranker = Reranker::new(Arc::new(ShortModel), config(1, 32));
        let err = reranker
            .rerank("q", candidates(&["a", "b", "c"]))
            .await
            .unwrap_err();
        assert!(err.is_upstream());
    }

    #[tokio::test]
    async fn test_batch_timeout() {
        let reranker = Reranker::new(
            Arc::new(StalledModel),
            RerankConfig {
                timeout: Duration::from_millis(20),
                ..config(1, 32)
            },
        );
        let err = reranker.rerank("q", candidates(&["a", "b"])).await.unwrap_err();
        assert!(matches!(
            err,
            LecternError::Timeout {
                service: Service::Reranker,
                ..
            }
        ));
    }
}
