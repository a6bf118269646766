//! Query pipeline: hybrid retrieval followed by reranking.

use crate::config::Settings;
use crate::error::Result;
use crate::rerank::Reranker;
use crate::retrieval::{HybridRetriever, RetrievalCandidate, RetrievalOutcome};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Per-query overrides of the configured behaviour.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Restrict results to these chapters.
    pub chapters: Vec<String>,
    /// Override `retrieval.use_bm25`.
    pub use_bm25: Option<bool>,
    /// Override `rerank.enabled`.
    pub rerank: Option<bool>,
    /// Override `rerank.final_top_k`.
    pub limit: Option<usize>,
}

/// Answers one query with ranked, metadata-complete chunks.
pub struct QueryEngine {
    retriever: Arc<HybridRetriever>,
    reranker: Reranker,
    top_k: usize,
    use_bm25: bool,
}

impl QueryEngine {
    pub fn new(retriever: Arc<HybridRetriever>, reranker: Reranker, settings: &Settings) -> Self {
        Self {
            retriever,
            reranker,
            top_k: settings.retrieval.top_k,
            use_bm25: settings.retrieval.use_bm25,
        }
    }

    pub fn retriever(&self) -> &Arc<HybridRetriever> {
        &self.retriever
    }

    /// Retrieve, then rerank. An empty corpus or no match gives an empty list.
    #[instrument(skip(self, options), fields(query = %query))]
    pub async fn search(&self, query: &str, options: &QueryOptions) -> Result<Vec<RetrievalCandidate>> {
        let chapters = (!options.chapters.is_empty()).then_some(options.chapters.as_slice());
        let use_bm25 = options.use_bm25.unwrap_or(self.use_bm25);

        if use_bm25 {
            match self.retriever.bm25().is_stale().await {
                Ok(true) => warn!("BM25 snapshot is older than the corpus; lexical results may lag"),
                Ok(false) => {}
                Err(e) => debug!("Could not check BM25 staleness: {}", e),
            }
        }

        let candidates = match self
            .retriever
            .retrieve(query, self.top_k, chapters, use_bm25)
            .await?
        {
            RetrievalOutcome::Empty => return Ok(Vec::new()),
            RetrievalOutcome::Found(candidates) => candidates,
        };

        let mut config = self.reranker.config().clone();
        if let Some(enabled) = options.rerank {
            config.enabled = enabled;
        }
        if let Some(limit) = options.limit {
            config.final_top_k = limit.max(1);
        }

        let results = self
            .reranker
            .with_config(config)
            .rerank(query, candidates)
            .await?;

        info!("Returning {} results", results.len());
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::Chunk;
    use crate::metadata::{MetadataStore, SqliteMetadataStore};
    use crate::rerank::{RerankConfig, TermOverlapModel};
    use crate::retrieval::{Bm25Index, RetrievalConfig};
    use crate::testing::KeywordEmbedder;
    use crate::transcript::VideoMetadata;
    use crate::vector_store::{ChunkPayload, MemoryVectorIndex, VectorIndex};
    use std::time::Duration;

    const VOCAB: &[&str] = &["lstm", "gate", "attention", "kernel"];

    async fn engine(texts: &[&str]) -> QueryEngine {
        let embedder = Arc::new(KeywordEmbedder::new(VOCAB));
        let vectors = Arc::new(MemoryVectorIndex::new());
        let metadata = Arc::new(SqliteMetadataStore::in_memory().unwrap());

        let video = VideoMetadata::new("Chapter 8", "Part 1: RNN", "https://youtu.be/rnn");
        metadata.upsert_video(&video).await.unwrap();

        let chunks: Vec<Chunk> = texts
            .iter()
            .enumerate()
            .map(|(i, t)| Chunk::new(&video.id, i as f64 * 50.0, i as f64 * 50.0 + 60.0, *t, i as u32))
            .collect();
        metadata.insert_chunks(&chunks).await.unwrap();

        let ids: Vec<String> = chunks.iter().map(|c| c.id.clone()).collect();
        let embeddings: Vec<Vec<f32>> = chunks.iter().map(|c| embedder.vector(&c.raw_text)).collect();
        let payloads: Vec<ChunkPayload> = chunks.iter().map(|c| ChunkPayload::new(&video, c)).collect();
        vectors.upsert(&ids, &embeddings, &payloads).await.unwrap();

        let bm25 = Arc::new(Bm25Index::new(metadata.clone(), Duration::from_secs(5)));
        let config = RetrievalConfig {
            score_threshold: None,
            ..RetrievalConfig::default()
        };
        let retriever = Arc::new(HybridRetriever::new(embedder, vectors, metadata, bm25, config));
        let reranker = Reranker::new(
            Arc::new(TermOverlapModel),
            RerankConfig {
                final_top_k: 2,
                ..RerankConfig::default()
            },
        );

        QueryEngine::new(retriever, reranker, &Settings::default())
    }

    #[tokio::test]
    async fn test_search_returns_reranked_results() {
        let engine = engine(&[
            "the lstm gate controls memory",
            "attention weights every token",
            "a kernel slides over the image",
            "lstm and attention compared",
        ])
        .await;

        let results = engine.search("lstm gate", &QueryOptions::default()).await.unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].metadata.raw_text, "the lstm gate controls memory");
        assert!(results[0].rerank_score.is_some());
    }

    #[tokio::test]
    async fn test_empty_corpus_gives_no_results() {
        let engine = engine(&[]).await;
        let results = engine.search("lstm", &QueryOptions::default()).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_options_override_rerank_and_limit() {
        let engine = engine(&[
            "the lstm gate controls memory",
            "lstm cells unrolled",
            "lstm versus gru",
        ])
        .await;

        let options = QueryOptions {
            rerank: Some(false),
            limit: Some(1),
            ..QueryOptions::default()
        };
        let results = engine.search("lstm", &options).await.unwrap();

        assert_eq!(results.len(), 1);
        assert!(results[0].rerank_score.is_none());
    }

    #[tokio::test]
    async fn test_chapter_filter_excludes_other_chapters() {
        let engine = engine(&["the lstm gate controls memory", "lstm cells unrolled"]).await;

        let options = QueryOptions {
            chapters: vec!["Chapter 2".to_string()],
            ..QueryOptions::default()
        };
        let results = engine.search("lstm", &options).await.unwrap();
        assert!(results.is_empty());
    }
}
