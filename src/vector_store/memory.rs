//! In-memory vector index implementation.
//!
//! Useful for testing and small datasets.

use super::{check_upsert_lengths, cosine_similarity, rank_hits, ChunkPayload, SearchFilter, VectorHit, VectorIndex};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

struct Point {
    vector: Vec<f32>,
    payload: ChunkPayload,
}

/// In-memory vector index.
#[derive(Default)]
pub struct MemoryVectorIndex {
    points: RwLock<HashMap<String, Point>>,
}

impl MemoryVectorIndex {
    /// Create a new in-memory vector index.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn upsert(&self, ids: &[String], vectors: &[Vec<f32>], payloads: &[ChunkPayload]) -> Result<usize> {
        check_upsert_lengths(ids, vectors, payloads)?;
        let mut points = self.points.write().unwrap_or_else(PoisonError::into_inner);
        for ((id, vector), payload) in ids.iter().zip(vectors).zip(payloads) {
            points.insert(
                id.clone(),
                Point {
                    vector: vector.clone(),
                    payload: payload.clone(),
                },
            );
        }
        Ok(ids.len())
    }

    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&SearchFilter>,
        score_threshold: Option<f32>,
    ) -> Result<Vec<VectorHit>> {
        let points = self.points.read().unwrap_or_else(PoisonError::into_inner);

        let hits: Vec<VectorHit> = points
            .iter()
            .filter(|(_, p)| filter.map_or(true, |f| f.matches(&p.payload)))
            .map(|(id, p)| VectorHit {
                id: id.clone(),
                score: cosine_similarity(vector, &p.vector),
                payload: p.payload.clone(),
            })
            .collect();

        Ok(rank_hits(hits, top_k, score_threshold))
    }

    async fn delete(&self, ids: &[String]) -> Result<usize> {
        let mut points = self.points.write().unwrap_or_else(PoisonError::into_inner);
        Ok(ids.iter().filter(|id| points.remove(id.as_str()).is_some()).count())
    }

    async fn delete_by_video(&self, video_id: &str) -> Result<usize> {
        let mut points = self.points.write().unwrap_or_else(PoisonError::into_inner);
        let initial_len = points.len();
        points.retain(|_, p| p.payload.video_id != video_id);
        Ok(initial_len - points.len())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.points.read().unwrap_or_else(PoisonError::into_inner).len())
    }
}
