//! Lectern - hybrid search over lecture transcripts
//!
//! Turns time-stamped lecture transcripts into overlapping, context-enriched
//! chunks and answers queries by fusing semantic and keyword search, then
//! reranking the fused candidates.
//!
//! # Overview
//!
//! Lectern allows you to:
//! - Chunk transcripts into overlapping fixed-duration windows
//! - Prefix every chunk with a short generated summary of where it sits in the lecture
//! - Search with vector similarity and BM25 fused by Reciprocal Rank Fusion
//! - Rerank the fused candidates with a cross-encoder
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - `config` - Configuration management and prompt templates
//! - `transcript` - Transcript, video and manifest models
//! - `chunking` - Time-window chunking and context enrichment
//! - `llm` - Text generation for chunk context
//! - `embedding` - Embedding generation
//! - `vector_store` - Vector index abstraction
//! - `metadata` - Relational chunk and video metadata
//! - `retrieval` - BM25, rank fusion and the hybrid retriever
//! - `rerank` - Second-stage relevance scoring
//! - `query` - Retrieve-then-rerank query pipeline
//! - `orchestrator` - Ingestion pipeline coordination
//!
//! # Example
//!
//! ```rust,no_run
//! use lectern::config::Settings;
//! use lectern::orchestrator::Orchestrator;
//! use lectern::query::QueryOptions;
//! use lectern::transcript::{Transcript, VideoMetadata};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load()?;
//!     let orchestrator = Orchestrator::new(settings)?;
//!
//!     let video = VideoMetadata::new(
//!         "Chapter 8",
//!         "[CS431] Part 1: LSTM",
//!         "https://www.youtube.com/watch?v=abc123",
//!     );
//!     let transcript = Transcript::load(Path::new("lstm.json"))?;
//!     let result = orchestrator.ingest(&video, &transcript).await?;
//!     println!("Indexed {} chunks", result.chunks_indexed);
//!
//!     let engine = orchestrator.query_engine()?;
//!     for hit in engine.search("how does the forget gate work", &QueryOptions::default()).await? {
//!         println!("{} @ {}", hit.metadata.video_title, hit.metadata.format_timestamp());
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod chunking;
pub mod cli;
pub mod config;
pub mod deadline;
pub mod embedding;
pub mod error;
pub mod llm;
pub mod metadata;
pub mod openai;
pub mod orchestrator;
pub mod query;
pub mod rerank;
pub mod retrieval;
pub mod transcript;
pub mod vector_store;

#[cfg(test)]
mod testing;

pub use error::{LecternError, Result, Service};
