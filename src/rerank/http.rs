//! Cross-encoder served over HTTP.
//!
//! Speaks the text-embeddings-inference `/rerank` protocol: the request
//! carries the query and a list of texts, the response is a list of
//! `{index, score}` objects in any order.

use super::RelevanceModel;
use crate::error::{LecternError, Result, Service};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

#[derive(Serialize)]
struct RerankRequest<'a> {
    query: &'a str,
    texts: &'a [String],
    truncate: bool,
}

#[derive(Deserialize)]
struct RankedText {
    index: usize,
    score: f32,
}

/// Relevance model behind a `/rerank` HTTP endpoint.
pub struct HttpRelevanceModel {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpRelevanceModel {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| LecternError::Config(format!("invalid rerank endpoint {}: {}", endpoint, e)))?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LecternError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

/// Put response scores back in request order.
fn scores_in_order(ranked: Vec<RankedText>, expected: usize) -> Result<Vec<f32>> {
    let mut scores: Vec<Option<f32>> = vec![None; expected];
    for item in ranked {
        let slot = scores.get_mut(item.index).ok_or_else(|| {
            LecternError::upstream(
                Service::Reranker,
                format!("score index {} out of range for {} texts", item.index, expected),
            )
        })?;
        *slot = Some(item.score);
    }

    scores
        .into_iter()
        .enumerate()
        .map(|(i, s)| {
            s.ok_or_else(|| LecternError::upstream(Service::Reranker, format!("no score for text {}", i)))
        })
        .collect()
}

#[async_trait]
impl RelevanceModel for HttpRelevanceModel {
    #[instrument(skip(self, texts), fields(count = texts.len()))]
    async fn score(&self, query: &str, texts: &[String]) -> Result<Vec<f32>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&RerankRequest {
                query,
                texts,
                truncate: true,
            })
            .send()
            .await
            .map_err(|e| LecternError::upstream(Service::Reranker, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LecternError::upstream(
                Service::Reranker,
                format!("HTTP {}: {}", status, body.chars().take(200).collect::<String>()),
            ));
        }

        let ranked: Vec<RankedText> = response
            .json()
            .await
            .map_err(|e| LecternError::upstream(Service::Reranker, format!("bad response: {}", e)))?;

        debug!("Scored {} texts", ranked.len());
        scores_in_order(ranked, texts.len())
    }

    fn name(&self) -> &str {
        "cross-encoder"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranked(pairs: &[(usize, f32)]) -> Vec<RankedText> {
        pairs
            .iter()
            .map(|&(index, score)| RankedText { index, score })
            .collect()
    }

    #[test]
    fn test_scores_reordered_by_index() {
        let scores = scores_in_order(ranked(&[(2, 0.1), (0, 0.9), (1, 0.5)]), 3).unwrap();
        assert_eq!(scores, vec![0.9, 0.5, 0.1]);
    }

    #[test]
    fn test_missing_or_out_of_range_index() {
        assert!(scores_in_order(ranked(&[(0, 0.9)]), 2).unwrap_err().is_upstream());
        assert!(scores_in_order(ranked(&[(5, 0.9)]), 1).unwrap_err().is_upstream());
    }

    #[test]
    fn test_parse_response() {
        let body = r#"[{"index": 1, "score": 0.25}, {"index": 0, "score": 0.75}]"#;
        let parsed: Vec<RankedText> = serde_json::from_str(body).unwrap();
        assert_eq!(scores_in_order(parsed, 2).unwrap(), vec![0.75, 0.25]);
    }

    #[test]
    fn test_invalid_endpoint() {
        assert!(matches!(
            HttpRelevanceModel::new("not a url", Duration::from_secs(1)),
            Err(LecternError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_upstream_error() {
        let model = HttpRelevanceModel::new("http://127.0.0.1:9/rerank", Duration::from_secs(2)).unwrap();
        let err = model.score("q", &["text".to_string()]).await.unwrap_err();
        assert!(err.is_upstream());
    }
}
