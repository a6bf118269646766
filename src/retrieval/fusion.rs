//! Reciprocal Rank Fusion.

use super::bm25::LexicalHit;
use crate::vector_store::VectorHit;
use std::collections::HashMap;

/// Fixed RRF constant.
pub const RRF_K: f64 = 60.0;

/// A chunk after fusion, before metadata enrichment.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedCandidate {
    pub chunk_id: String,
    /// Cosine similarity, when the chunk came back from vector search.
    pub vector_score: Option<f32>,
    /// BM25 score, when the chunk came back from lexical search.
    pub lexical_score: Option<f64>,
    pub fused_score: f64,
}

/// Contribution of a 1-based `rank` to the fused score.
pub fn rrf_contribution(rank: usize) -> f64 {
    1.0 / (RRF_K + rank as f64)
}

/// Fuse the vector and lexical rankings and keep the best `top_k`.
///
/// Candidates are keyed by chunk id. Equal fused scores keep first-seen
/// order, with the vector list read first.
pub fn reciprocal_rank_fusion(
    vector: &[VectorHit],
    lexical: &[LexicalHit],
    top_k: usize,
) -> Vec<FusedCandidate> {
    let mut fused: Vec<FusedCandidate> = Vec::with_capacity(vector.len() + lexical.len());
    let mut position: HashMap<&str, usize> = HashMap::with_capacity(vector.len() + lexical.len());

    for (rank, hit) in vector.iter().enumerate() {
        let slot = *position.entry(hit.id.as_str()).or_insert_with(|| {
            fused.push(FusedCandidate {
                chunk_id: hit.id.clone(),
                vector_score: None,
                lexical_score: None,
                fused_score: 0.0,
            });
            fused.len() - 1
        });
        let candidate = &mut fused[slot];
        // A duplicate id within one list counts at its best rank only.
        if candidate.vector_score.is_none() {
            candidate.vector_score = Some(hit.score);
            candidate.fused_score += rrf_contribution(rank + 1);
        }
    }

    for (rank, hit) in lexical.iter().enumerate() {
        let slot = *position.entry(hit.chunk_id.as_str()).or_insert_with(|| {
            fused.push(FusedCandidate {
                chunk_id: hit.chunk_id.clone(),
                vector_score: None,
                lexical_score: None,
                fused_score: 0.0,
            });
            fused.len() - 1
        });
        let candidate = &mut fused[slot];
        if candidate.lexical_score.is_none() {
            candidate.lexical_score = Some(hit.score);
            candidate.fused_score += rrf_contribution(rank + 1);
        }
    }

    // Stable sort keeps first-seen order on exact ties.
    fused.sort_by(|a, b| b.fused_score.total_cmp(&a.fused_score));
    fused.truncate(top_k);
    fused
}
