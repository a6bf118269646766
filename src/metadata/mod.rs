//! Chunk and video metadata.
//!
//! The metadata store is the source of truth for chunk text and timing. The
//! vector index only holds a copy in its payloads, and the lexical index is
//! rebuilt from [`MetadataStore::corpus`].

mod sqlite;

pub use sqlite::SqliteMetadataStore;

use crate::chunking::Chunk;
use crate::error::Result;
use crate::transcript::{format_timestamp, VideoMetadata};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Everything needed to show a chunk as a search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub chunk_id: String,
    pub video_id: String,
    pub chapter: String,
    pub video_title: String,
    pub video_url: String,
    pub start_time: f64,
    pub end_time: f64,
    pub raw_text: String,
    pub contextualized_text: String,
}

impl ChunkMetadata {
    /// Deep link to the chunk's start in the video.
    pub fn link(&self) -> String {
        VideoMetadata::new(&self.chapter, &self.video_title, &self.video_url)
            .link_at(self.start_time)
            .unwrap_or_else(|| self.video_url.clone())
    }

    /// Format the start timestamp for display.
    pub fn format_timestamp(&self) -> String {
        format_timestamp(self.start_time)
    }
}

/// One document of the lexical corpus.
#[derive(Debug, Clone, PartialEq)]
pub struct CorpusEntry {
    pub chunk_id: String,
    pub chapter: String,
    /// Contextualized text, the same text that was embedded.
    pub text: String,
}

/// Summary information about an ingested video.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoRecord {
    pub video: VideoMetadata,
    pub chunk_count: u32,
    /// Latest chunk end, in seconds.
    pub covered_seconds: f64,
    pub ingested_at: DateTime<Utc>,
}

/// Trait for metadata store implementations.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Insert or update a video.
    async fn upsert_video(&self, video: &VideoMetadata) -> Result<()>;

    /// Insert or replace chunks. Their video must already exist.
    async fn insert_chunks(&self, chunks: &[Chunk]) -> Result<usize>;

    /// Upsert a video and swap its chunks for `chunks` in one transaction.
    /// Returns the ids of the chunks that were dropped.
    async fn replace_video(&self, video: &VideoMetadata, chunks: &[Chunk]) -> Result<Vec<String>>;

    /// Replace a chunk's contextualized text.
    async fn update_contextualized_text(&self, chunk_id: &str, text: &str) -> Result<()>;

    /// Metadata for the given chunk ids in one round trip. Unknown ids are
    /// absent from the map.
    async fn fetch_chunks(&self, ids: &[String]) -> Result<HashMap<String, ChunkMetadata>>;

    /// Every chunk in insertion order, for building the lexical index.
    async fn corpus(&self) -> Result<Vec<CorpusEntry>>;

    /// Chunks of one video, ordered by position.
    async fn chunks_for_video(&self, video_id: &str) -> Result<Vec<Chunk>>;

    async fn get_video(&self, video_id: &str) -> Result<Option<VideoMetadata>>;

    /// Delete a video and its chunks, returning the number of chunks removed.
    async fn delete_video(&self, video_id: &str) -> Result<usize>;

    /// List all videos, most recently ingested first.
    async fn list_videos(&self) -> Result<Vec<VideoRecord>>;

    /// When the corpus last changed, if ever.
    async fn corpus_updated_at(&self) -> Result<Option<DateTime<Utc>>>;
}
