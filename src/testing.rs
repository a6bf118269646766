//! Deterministic collaborators for unit tests.

use crate::chunking::Chunk;
use crate::embedding::Embedder;
use crate::error::{LecternError, Result, Service};
use crate::metadata::{ChunkMetadata, CorpusEntry, MetadataStore, VideoRecord};
use crate::transcript::VideoMetadata;
use crate::vector_store::{ChunkPayload, MemoryVectorIndex, SearchFilter, VectorHit, VectorIndex};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Bag-of-words embedder over a fixed vocabulary. Texts sharing vocabulary
/// words point in similar directions.
pub struct KeywordEmbedder {
    vocabulary: Vec<String>,
    pub calls: AtomicUsize,
}

impl KeywordEmbedder {
    pub fn new(vocabulary: &[&str]) -> Self {
        Self {
            vocabulary: vocabulary.iter().map(|w| w.to_string()).collect(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn vector(&self, text: &str) -> Vec<f32> {
        let lowered = text.to_lowercase();
        self.vocabulary
            .iter()
            .map(|w| lowered.split_whitespace().filter(|t| t == w).count() as f32)
            .collect()
    }
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.vector(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }

    fn dimensions(&self) -> usize {
        self.vocabulary.len()
    }
}

/// Embedder that always fails, or stalls past any reasonable deadline.
pub enum BrokenEmbedder {
    Failing,
    Stalled,
}

#[async_trait]
impl Embedder for BrokenEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        match self {
            BrokenEmbedder::Failing => Err(LecternError::upstream(Service::Embedding, "connection refused")),
            BrokenEmbedder::Stalled => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(Vec::new())
            }
        }
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    fn dimensions(&self) -> usize {
        0
    }
}

async fn stall<T>(service: Service) -> Result<T> {
    tokio::time::sleep(Duration::from_secs(30)).await;
    Err(LecternError::upstream(service, "stalled"))
}

/// What a [`FaultyVectorIndex`] gets wrong.
pub enum VectorFault {
    /// Searches never answer.
    StallSearch,
    /// Upserts are rejected.
    FailUpsert,
}

/// Memory index with one broken operation; everything else passes through.
pub struct FaultyVectorIndex {
    inner: Arc<MemoryVectorIndex>,
    fault: VectorFault,
}

impl FaultyVectorIndex {
    pub fn new(inner: Arc<MemoryVectorIndex>, fault: VectorFault) -> Self {
        Self { inner, fault }
    }
}

#[async_trait]
impl VectorIndex for FaultyVectorIndex {
    async fn upsert(&self, ids: &[String], vectors: &[Vec<f32>], payloads: &[ChunkPayload]) -> Result<usize> {
        match self.fault {
            VectorFault::FailUpsert => Err(LecternError::upstream(Service::VectorStore, "disk full")),
            VectorFault::StallSearch => self.inner.upsert(ids, vectors, payloads).await,
        }
    }

    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&SearchFilter>,
        score_threshold: Option<f32>,
    ) -> Result<Vec<VectorHit>> {
        match self.fault {
            VectorFault::StallSearch => stall(Service::VectorStore).await,
            VectorFault::FailUpsert => self.inner.search(vector, top_k, filter, score_threshold).await,
        }
    }

    async fn delete(&self, ids: &[String]) -> Result<usize> {
        self.inner.delete(ids).await
    }

    async fn delete_by_video(&self, video_id: &str) -> Result<usize> {
        self.inner.delete_by_video(video_id).await
    }

    async fn count(&self) -> Result<usize> {
        self.inner.count().await
    }
}

/// Metadata store whose every call hangs.
pub struct StalledMetadataStore;

#[async_trait]
impl MetadataStore for StalledMetadataStore {
    async fn upsert_video(&self, _video: &VideoMetadata) -> Result<()> {
        stall(Service::MetadataStore).await
    }

    async fn insert_chunks(&self, _chunks: &[Chunk]) -> Result<usize> {
        stall(Service::MetadataStore).await
    }

    async fn replace_video(&self, _video: &VideoMetadata, _chunks: &[Chunk]) -> Result<Vec<String>> {
        stall(Service::MetadataStore).await
    }

    async fn update_contextualized_text(&self, _chunk_id: &str, _text: &str) -> Result<()> {
        stall(Service::MetadataStore).await
    }

    async fn fetch_chunks(&self, _ids: &[String]) -> Result<HashMap<String, ChunkMetadata>> {
        stall(Service::MetadataStore).await
    }

    async fn corpus(&self) -> Result<Vec<CorpusEntry>> {
        stall(Service::MetadataStore).await
    }

    async fn chunks_for_video(&self, _video_id: &str) -> Result<Vec<Chunk>> {
        stall(Service::MetadataStore).await
    }

    async fn get_video(&self, _video_id: &str) -> Result<Option<VideoMetadata>> {
        stall(Service::MetadataStore).await
    }

    async fn delete_video(&self, _video_id: &str) -> Result<usize> {
        stall(Service::MetadataStore).await
    }

    async fn list_videos(&self) -> Result<Vec<VideoRecord>> {
        stall(Service::MetadataStore).await
    }

    async fn corpus_updated_at(&self) -> Result<Option<DateTime<Utc>>> {
        stall(Service::MetadataStore).await
    }
}
