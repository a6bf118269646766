//! Hybrid retrieval: vector search and BM25 fused with Reciprocal Rank Fusion.

mod bm25;
mod fusion;
mod hybrid;

pub use bm25::{tokenize, Bm25Index, Bm25Params, Bm25Snapshot, LexicalHit};
pub use fusion::{reciprocal_rank_fusion, rrf_contribution, FusedCandidate, RRF_K};
pub use hybrid::{HybridRetriever, RetrievalConfig};

use crate::metadata::ChunkMetadata;
use serde::Serialize;

/// A retrieved chunk with the scores of every stage it passed through.
///
/// `fused_score` is always set. `vector_score` and `lexical_score` are set
/// only when the chunk appeared in that list, and `rerank_score` only when
/// the reranker actually ran.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalCandidate {
    pub chunk_id: String,
    pub vector_score: Option<f32>,
    pub lexical_score: Option<f64>,
    pub fused_score: f64,
    pub rerank_score: Option<f32>,
    pub metadata: ChunkMetadata,
}

impl RetrievalCandidate {
    pub fn from_fused(fused: FusedCandidate, metadata: ChunkMetadata) -> Self {
        Self {
            chunk_id: fused.chunk_id,
            vector_score: fused.vector_score,
            lexical_score: fused.lexical_score,
            fused_score: fused.fused_score,
            rerank_score: None,
            metadata,
        }
    }

    /// Rerank score when present, otherwise the fused score.
    pub fn relevance(&self) -> f64 {
        self.rerank_score.map_or(self.fused_score, f64::from)
    }
}

/// Result of one retrieval.
#[derive(Debug, Clone, PartialEq)]
pub enum RetrievalOutcome {
    Found(Vec<RetrievalCandidate>),
    /// Nothing matched. This is a normal answer, not a failure.
    Empty,
}

impl RetrievalOutcome {
    pub fn from_candidates(candidates: Vec<RetrievalCandidate>) -> Self {
        if candidates.is_empty() {
            RetrievalOutcome::Empty
        } else {
            RetrievalOutcome::Found(candidates)
        }
    }

    pub fn candidates(&self) -> &[RetrievalCandidate] {
        match self {
            RetrievalOutcome::Found(c) => c,
            RetrievalOutcome::Empty => &[],
        }
    }

    pub fn into_candidates(self) -> Vec<RetrievalCandidate> {
        match self {
            RetrievalOutcome::Found(c) => c,
            RetrievalOutcome::Empty => Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, RetrievalOutcome::Empty)
    }
}

#[cfg(test)]
pub(crate) fn test_candidate(id: &str, fused_score: f64, text: &str) -> RetrievalCandidate {
    RetrievalCandidate {
        chunk_id: id.to_string(),
        vector_score: None,
        lexical_score: None,
        fused_score,
        rerank_score: None,
        metadata: ChunkMetadata {
            chunk_id: id.to_string(),
            video_id: "v".to_string(),
            chapter: "1".to_string(),
            video_title: "Lecture".to_string(),
            video_url: "https://youtu.be/v".to_string(),
            start_time: 0.0,
            end_time: 60.0,
            raw_text: text.to_string(),
            contextualized_text: text.to_string(),
        },
    }
}
