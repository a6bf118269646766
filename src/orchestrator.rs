//! Ingestion pipeline for Lectern.
//!
//! Coordinates the path from a transcript to searchable chunks: chunk,
//! enrich, embed, then write to the vector index and metadata store. The
//! BM25 snapshot is rebuilt once after each batch of writes.

use crate::chunking::{Chunk, ChunkingConfig, ContextConfig, ContextEnricher, TimeWindowChunker};
use crate::config::{Prompts, Settings};
use crate::deadline;
use crate::embedding::{Embedder, OpenAIEmbedder};
use crate::error::{LecternError, Result, Service};
use crate::llm::OpenAIGenerator;
use crate::metadata::{MetadataStore, SqliteMetadataStore, VideoRecord};
use crate::query::QueryEngine;
use crate::rerank::{create_model, RerankConfig, Reranker};
use crate::retrieval::{Bm25Index, HybridRetriever, RetrievalConfig};
use crate::transcript::{Transcript, VideoManifest, VideoMetadata};
use crate::vector_store::{ChunkPayload, MemoryVectorIndex, SqliteVectorIndex, VectorIndex};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// The main orchestrator for the Lectern pipeline.
pub struct Orchestrator {
    settings: Settings,
    embedder: Arc<dyn Embedder>,
    vectors: Arc<dyn VectorIndex>,
    metadata: Arc<dyn MetadataStore>,
    bm25: Arc<Bm25Index>,
    chunker: TimeWindowChunker,
    enricher: ContextEnricher,
}

impl Orchestrator {
    /// Create an orchestrator from settings, opening the configured stores.
    pub fn new(settings: Settings) -> Result<Self> {
        // Load prompts (with optional custom directory and variables)
        let prompts = Prompts::load(
            settings.prompts.custom_dir.as_deref(),
            Some(&settings.prompts.variables),
        )?;

        let enricher = if settings.context.enabled {
            info!("Using {} for chunk context", settings.context.model);
            ContextEnricher::new(
                Arc::new(OpenAIGenerator::new(&settings.context.model)?),
                prompts,
                ContextConfig::from(&settings.context),
            )
        } else {
            info!("Context generation disabled, using the fallback template");
            ContextEnricher::templated(prompts)
        };

        let embedder: Arc<dyn Embedder> = Arc::new(OpenAIEmbedder::from_settings(&settings.embedding)?);

        let vectors: Arc<dyn VectorIndex> = match settings.vector_store.provider.as_str() {
            "sqlite" => Arc::new(SqliteVectorIndex::new(&settings.vector_store_path())?),
            "memory" => Arc::new(MemoryVectorIndex::new()),
            other => {
                return Err(LecternError::Config(format!(
                    "Unknown vector store provider: {}",
                    other
                )))
            }
        };

        let metadata: Arc<dyn MetadataStore> = Arc::new(SqliteMetadataStore::new(&settings.metadata_path())?);

        Self::with_components(settings, embedder, vectors, metadata, enricher)
    }

    /// Create an orchestrator with custom components.
    pub fn with_components(
        settings: Settings,
        embedder: Arc<dyn Embedder>,
        vectors: Arc<dyn VectorIndex>,
        metadata: Arc<dyn MetadataStore>,
        enricher: ContextEnricher,
    ) -> Result<Self> {
        let chunker = TimeWindowChunker::new(ChunkingConfig::try_from(&settings.chunking)?);
        let bm25 = Arc::new(Bm25Index::new(metadata.clone(), settings.metadata.timeout()));

        Ok(Self {
            settings,
            embedder,
            vectors,
            metadata,
            bm25,
            chunker,
            enricher,
        })
    }

    /// Get the settings.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn vector_index(&self) -> Arc<dyn VectorIndex> {
        self.vectors.clone()
    }

    pub fn metadata_store(&self) -> Arc<dyn MetadataStore> {
        self.metadata.clone()
    }

    pub fn bm25(&self) -> Arc<Bm25Index> {
        self.bm25.clone()
    }

    /// Build a query engine sharing this orchestrator's stores and BM25 index.
    pub fn query_engine(&self) -> Result<QueryEngine> {
        let retriever = HybridRetriever::new(
            self.embedder.clone(),
            self.vectors.clone(),
            self.metadata.clone(),
            self.bm25.clone(),
            RetrievalConfig::from(&self.settings),
        );
        let reranker = Reranker::new(
            create_model(&self.settings.rerank)?,
            RerankConfig::from(&self.settings.rerank),
        );
        Ok(QueryEngine::new(Arc::new(retriever), reranker, &self.settings))
    }

    /// Ingest one video and rebuild the BM25 snapshot.
    #[instrument(skip(self, video, transcript), fields(video_id = %video.id))]
    pub async fn ingest(&self, video: &VideoMetadata, transcript: &Transcript) -> Result<IngestResult> {
        let result = self.index_video(video, transcript).await?;
        self.bm25.rebuild().await?;
        Ok(result)
    }

    /// Ingest every video in a manifest, rebuilding BM25 once at the end.
    ///
    /// A video that fails is reported and skipped; the rest of the batch
    /// still lands.
    #[instrument(skip(self, manifest), fields(videos = manifest.videos.len()))]
    pub async fn ingest_manifest(&self, manifest: &VideoManifest) -> Result<BatchReport> {
        let mut report = BatchReport::default();

        for entry in &manifest.videos {
            let video = entry.metadata();
            let outcome = match Transcript::load(&entry.transcript) {
                Ok(transcript) => self.index_video(&video, &transcript).await,
                Err(e) => Err(e),
            };
            match outcome {
                Ok(result) => report.ingested.push(result),
                Err(e) => {
                    warn!("Failed to ingest {}: {}", video.id, e);
                    report.failed.push((video.id, e.to_string()));
                }
            }
        }

        if !report.ingested.is_empty() {
            self.bm25.rebuild().await?;
        }

        info!(
            "Ingested {} videos, {} failed",
            report.ingested.len(),
            report.failed.len()
        );
        Ok(report)
    }

    /// Chunk, enrich, embed and store one video without touching BM25.
    async fn index_video(&self, video: &VideoMetadata, transcript: &Transcript) -> Result<IngestResult> {
        let mut chunks = self.chunker.chunk(&video.id, &transcript.segments)?;
        info!("Created {} chunks for {}", chunks.len(), video.id);

        let report = self.enricher.enrich(&mut chunks, video).await;

        // Nothing of the previous version is touched until the new chunks are
        // embedded, upserted under fresh ids and committed to the metadata
        // store. Any failure before that leaves the old version searchable.
        let embeddings = self.embed_chunks(&chunks).await?;
        let new_ids: Vec<String> = chunks.iter().map(|c| c.id.clone()).collect();

        let staged = async {
            let indexed = self.upsert_vectors(video, &chunks, embeddings).await?;
            let replaced = self
                .within_metadata(self.metadata.replace_video(video, &chunks))
                .await?;
            Ok::<_, LecternError>((indexed, replaced))
        }
        .await;

        let (indexed, replaced) = match staged {
            Ok(staged) => staged,
            Err(e) => {
                self.discard_vectors(&new_ids).await;
                return Err(e);
            }
        };

        if !replaced.is_empty() {
            info!("Replaced previous version of {} ({} chunks)", video.id, replaced.len());
            self.discard_vectors(&replaced).await;
        }

        Ok(IngestResult {
            video_id: video.id.clone(),
            title: video.title.clone(),
            chunks_indexed: indexed,
            contexts_generated: report.generated,
            context_fallbacks: report.fallbacks,
        })
    }

    /// Regenerate the contextual prefixes of a stored video.
    ///
    /// Chunk ids, boundaries and raw text stay as they are; only the
    /// contextualized text, its embedding and the BM25 snapshot change.
    #[instrument(skip(self))]
    pub async fn recontext(&self, video_id: &str) -> Result<IngestResult> {
        let video = self
            .within_metadata(self.metadata.get_video(video_id))
            .await?
            .ok_or_else(|| LecternError::VideoNotFound(video_id.to_string()))?;

        let mut chunks = self.within_metadata(self.metadata.chunks_for_video(video_id)).await?;
        if chunks.is_empty() {
            return Err(LecternError::InvalidInput(format!(
                "Video '{}' has no stored chunks",
                video_id
            )));
        }

        info!("Regenerating context for {} chunks of '{}'", chunks.len(), video.title);
        let report = self.enricher.enrich(&mut chunks, &video).await;
        let embeddings = self.embed_chunks(&chunks).await?;

        for chunk in &chunks {
            self.within_metadata(
                self.metadata
                    .update_contextualized_text(&chunk.id, &chunk.contextualized_text),
            )
            .await?;
        }
        let indexed = self.upsert_vectors(&video, &chunks, embeddings).await?;
        self.bm25.rebuild().await?;

        Ok(IngestResult {
            video_id: video.id,
            title: video.title,
            chunks_indexed: indexed,
            contexts_generated: report.generated,
            context_fallbacks: report.fallbacks,
        })
    }

    /// Remove a video from both stores, returning the number of chunks deleted.
    #[instrument(skip(self))]
    pub async fn remove_video(&self, video_id: &str) -> Result<usize> {
        deadline::within(
            Service::VectorStore,
            self.settings.vector_store.timeout(),
            self.vectors.delete_by_video(video_id),
        )
        .await?;
        let removed = self.within_metadata(self.metadata.delete_video(video_id)).await?;
        self.bm25.rebuild().await?;

        info!("Removed {} chunks of {}", removed, video_id);
        Ok(removed)
    }

    /// All ingested videos, most recent first.
    pub async fn list_videos(&self) -> Result<Vec<VideoRecord>> {
        self.within_metadata(self.metadata.list_videos()).await
    }

    /// Best-effort removal of vector points. Points left behind have no
    /// metadata row and are dropped at query time.
    async fn discard_vectors(&self, ids: &[String]) {
        let result = deadline::within(
            Service::VectorStore,
            self.settings.vector_store.timeout(),
            self.vectors.delete(ids),
        )
        .await;
        if let Err(e) = result {
            warn!("Failed to delete {} vector points: {}", ids.len(), e);
        }
    }

    /// Embed contextualized texts in batches, each under its own deadline.
    async fn embed_chunks(&self, chunks: &[Chunk]) -> Result<Vec<Vec<f32>>> {
        let texts: Vec<String> = chunks.iter().map(|c| c.contextualized_text.clone()).collect();
        let mut embeddings = Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.settings.embedding.batch_size.max(1)) {
            let batch_embeddings = deadline::within(
                Service::Embedding,
                self.settings.embedding.timeout(),
                self.embedder.embed_batch(batch),
            )
            .await?;
            if batch_embeddings.len() != batch.len() {
                return Err(LecternError::upstream(
                    Service::Embedding,
                    format!("expected {} embeddings, got {}", batch.len(), batch_embeddings.len()),
                ));
            }
            embeddings.extend(batch_embeddings);
        }

        Ok(embeddings)
    }

    async fn upsert_vectors(
        &self,
        video: &VideoMetadata,
        chunks: &[Chunk],
        embeddings: Vec<Vec<f32>>,
    ) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }
        let ids: Vec<String> = chunks.iter().map(|c| c.id.clone()).collect();
        let payloads: Vec<ChunkPayload> = chunks.iter().map(|c| ChunkPayload::new(video, c)).collect();

        deadline::within(
            Service::VectorStore,
            self.settings.vector_store.timeout(),
            self.vectors.upsert(&ids, &embeddings, &payloads),
        )
        .await
    }

    async fn within_metadata<T>(&self, fut: impl std::future::Future<Output = Result<T>>) -> Result<T> {
        deadline::within(Service::MetadataStore, self.settings.metadata.timeout(), fut).await
    }
}

/// Result of ingesting one video.
#[derive(Debug, Clone)]
pub struct IngestResult {
    pub video_id: String,
    pub title: String,
    /// Number of chunks indexed.
    pub chunks_indexed: usize,
    pub contexts_generated: usize,
    /// Chunks that received the template prefix.
    pub context_fallbacks: usize,
}

/// Outcome of a manifest ingestion.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub ingested: Vec<IngestResult>,
    /// Video id and error message for each failed video.
    pub failed: Vec<(String, String)>,
}
