//! Vector store abstraction for Lectern.
//!
//! Provides a trait-based interface for nearest-neighbour search over chunk
//! embeddings, with payload filters on metadata fields.

mod memory;
mod sqlite;

pub use memory::MemoryVectorIndex;
pub use sqlite::SqliteVectorIndex;

use crate::chunking::Chunk;
use crate::error::Result;
use crate::transcript::VideoMetadata;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Metadata stored alongside each chunk vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkPayload {
    pub video_id: String,
    pub chapter: String,
    pub video_title: String,
    pub video_url: String,
    pub start_time: f64,
    pub end_time: f64,
    pub text: String,
    pub contextualized_text: String,
}

impl ChunkPayload {
    pub fn new(video: &VideoMetadata, chunk: &Chunk) -> Self {
        Self {
            video_id: video.id.clone(),
            chapter: video.chapter.clone(),
            video_title: video.title.clone(),
            video_url: video.url.clone(),
            start_time: chunk.start_time,
            end_time: chunk.end_time,
            text: chunk.raw_text.clone(),
            contextualized_text: chunk.contextualized_text.clone(),
        }
    }

    /// Value of a filterable field by name.
    pub fn field(&self, key: &str) -> Option<&str> {
        match key {
            "video_id" => Some(&self.video_id),
            "chapter" => Some(&self.chapter),
            "video_title" => Some(&self.video_title),
            "video_url" => Some(&self.video_url),
            _ => None,
        }
    }
}

/// How a field must match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Match {
    /// Exact value.
    Value(String),
    /// Any value in the set.
    Any(Vec<String>),
}

/// A condition on one payload field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldCondition {
    pub key: String,
    #[serde(rename = "match")]
    pub matcher: Match,
}

impl FieldCondition {
    pub fn matches(&self, payload: &ChunkPayload) -> bool {
        let Some(value) = payload.field(&self.key) else {
            return false;
        };
        match &self.matcher {
            Match::Value(expected) => value == expected,
            Match::Any(set) => set.iter().any(|v| v == value),
        }
    }
}

/// Conjunction of field conditions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilter {
    pub must: Vec<FieldCondition>,
}

impl SearchFilter {
    /// Restrict `chapter` to any of `chapters`.
    pub fn chapters(chapters: &[String]) -> Self {
        Self {
            must: vec![FieldCondition {
                key: "chapter".to_string(),
                matcher: Match::Any(chapters.to_vec()),
            }],
        }
    }

    /// Restrict `key` to exactly `value`.
    pub fn field_equals(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            must: vec![FieldCondition {
                key: key.into(),
                matcher: Match::Value(value.into()),
            }],
        }
    }

    pub fn matches(&self, payload: &ChunkPayload) -> bool {
        self.must.iter().all(|c| c.matches(payload))
    }
}

/// A search hit with score.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    /// Chunk ID.
    pub id: String,
    /// Similarity score (higher is better).
    pub score: f32,
    pub payload: ChunkPayload,
}

/// Trait for vector index implementations.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace points. The three slices must have equal length.
    async fn upsert(&self, ids: &[String], vectors: &[Vec<f32>], payloads: &[ChunkPayload]) -> Result<usize>;

    /// Nearest neighbours of `vector`, best first. Hits scoring below
    /// `score_threshold` are dropped.
    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&SearchFilter>,
        score_threshold: Option<f32>,
    ) -> Result<Vec<VectorHit>>;

    /// Delete points by id. Unknown ids are ignored.
    async fn delete(&self, ids: &[String]) -> Result<usize>;

    /// Delete every point belonging to a video.
    async fn delete_by_video(&self, video_id: &str) -> Result<usize>;

    /// Get total point count.
    async fn count(&self) -> Result<usize>;
}

fn check_upsert_lengths(ids: &[String], vectors: &[Vec<f32>], payloads: &[ChunkPayload]) -> Result<()> {
    if ids.len() != vectors.len() || ids.len() != payloads.len() {
        return Err(crate::error::LecternError::InvalidInput(format!(
            "upsert needs matching lengths, got {} ids, {} vectors, {} payloads",
            ids.len(),
            vectors.len(),
            payloads.len()
        )));
    }
    Ok(())
}

/// Rank scored hits best first, apply the threshold and truncate.
fn rank_hits(mut hits: Vec<VectorHit>, top_k: usize, score_threshold: Option<f32>) -> Vec<VectorHit> {
    if let Some(threshold) = score_threshold {
        hits.retain(|h| h.score >= threshold);
    }
    hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
    hits.truncate(top_k);
    hits
}

/// Compute cosine similarity between two vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

#[cfg(test)]
pub(crate) fn test_payload(video_id: &str, chapter: &str, text: &str) -> ChunkPayload {
    ChunkPayload {
        video_id: video_id.to_string(),
        chapter: chapter.to_string(),
        video_title: format!("Video {}", video_id),
        video_url: format!("https://youtu.be/{}", video_id),
        start_time: 0.0,
        end_time: 60.0,
        text: text.to_string(),
        contextualized_text: text.to_string(),
    }
}
