//! Hybrid retriever combining vector search and BM25.

use super::bm25::{Bm25Index, LexicalHit};
use super::fusion::reciprocal_rank_fusion;
use super::{RetrievalCandidate, RetrievalOutcome};
use crate::config::Settings;
use crate::deadline;
use crate::embedding::Embedder;
use crate::error::{LecternError, Result, Service};
use crate::metadata::MetadataStore;
use crate::vector_store::{SearchFilter, VectorHit, VectorIndex};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Retrieval tunables.
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    pub vector_top_k: usize,
    pub bm25_top_k: usize,
    /// Vector hits scoring below this are dropped before fusion.
    pub score_threshold: Option<f32>,
    pub embedding_timeout: Duration,
    pub vector_timeout: Duration,
    pub metadata_timeout: Duration,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            vector_top_k: 150,
            bm25_top_k: 150,
            score_threshold: Some(0.5),
            embedding_timeout: Duration::from_secs(30),
            vector_timeout: Duration::from_secs(10),
            metadata_timeout: Duration::from_secs(10),
        }
    }
}

impl From<&Settings> for RetrievalConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            vector_top_k: settings.retrieval.vector_top_k,
            bm25_top_k: settings.retrieval.bm25_top_k,
            score_threshold: Some(settings.vector_store.score_threshold),
            embedding_timeout: settings.embedding.timeout(),
            vector_timeout: settings.vector_store.timeout(),
            metadata_timeout: settings.metadata.timeout(),
        }
    }
}

/// Runs vector and lexical search side by side and fuses them.
pub struct HybridRetriever {
    embedder: Arc<dyn Embedder>,
    vectors: Arc<dyn VectorIndex>,
    metadata: Arc<dyn MetadataStore>,
    bm25: Arc<Bm25Index>,
    config: RetrievalConfig,
}

impl HybridRetriever {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        vectors: Arc<dyn VectorIndex>,
        metadata: Arc<dyn MetadataStore>,
        bm25: Arc<Bm25Index>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            embedder,
            vectors,
            metadata,
            bm25,
            config,
        }
    }

    pub fn bm25(&self) -> &Arc<Bm25Index> {
        &self.bm25
    }

    /// Retrieve up to `top_k` fused candidates for `query`.
    ///
    /// `chapter_filter` restricts both searches to the listed chapters.
    #[instrument(skip(self, chapter_filter), fields(query = %query))]
    pub async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        chapter_filter: Option<&[String]>,
        use_bm25: bool,
    ) -> Result<RetrievalOutcome> {
        if query.trim().is_empty() {
            return Err(LecternError::InvalidInput("query is empty".to_string()));
        }
        let chapter_filter = chapter_filter.filter(|c| !c.is_empty());

        let (vector_hits, lexical_hits) = tokio::try_join!(
            self.vector_search(query, chapter_filter),
            self.lexical_search(query, chapter_filter, use_bm25),
        )?;

        debug!(
            "Vector search returned {}, BM25 returned {}",
            vector_hits.len(),
            lexical_hits.len()
        );

        let fused = reciprocal_rank_fusion(&vector_hits, &lexical_hits, top_k);
        if fused.is_empty() {
            info!("No candidates for query");
            return Ok(RetrievalOutcome::Empty);
        }

        let ids: Vec<String> = fused.iter().map(|c| c.chunk_id.clone()).collect();
        let mut rows = deadline::within(
            Service::MetadataStore,
            self.config.metadata_timeout,
            self.metadata.fetch_chunks(&ids),
        )
        .await?;

        let fused_count = fused.len();
        let candidates: Vec<RetrievalCandidate> = fused
            .into_iter()
            .filter_map(|c| {
                let metadata = rows.remove(&c.chunk_id)?;
                Some(RetrievalCandidate::from_fused(c, metadata))
            })
            .collect();

        if candidates.len() < fused_count {
            debug!(
                "Dropped {} candidates with no metadata",
                fused_count - candidates.len()
            );
        }

        info!("Retrieved {} candidates", candidates.len());
        Ok(RetrievalOutcome::from_candidates(candidates))
    }

    async fn vector_search(&self, query: &str, chapters: Option<&[String]>) -> Result<Vec<VectorHit>> {
        let embedding = deadline::within(
            Service::Embedding,
            self.config.embedding_timeout,
            self.embedder.embed(query),
        )
        .await?;

        let filter = chapters.map(SearchFilter::chapters);
        deadline::within(
            Service::VectorStore,
            self.config.vector_timeout,
            self.vectors.search(
                &embedding,
                self.config.vector_top_k,
                filter.as_ref(),
                self.config.score_threshold,
            ),
        )
        .await
    }

    async fn lexical_search(
        &self,
        query: &str,
        chapters: Option<&[String]>,
        use_bm25: bool,
    ) -> Result<Vec<LexicalHit>> {
        if !use_bm25 {
            return Ok(Vec::new());
        }
        self.bm25.search(query, self.config.bm25_top_k, chapters).await
    }
}
