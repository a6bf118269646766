//! Chunking of transcripts into retrievable units.
//!
//! [`TimeWindowChunker`] cuts ordered segments into overlapping fixed-duration
//! windows, and [`ContextEnricher`] prefixes every chunk with a short
//! situational summary before it is embedded and lexically indexed.

mod context;
mod window;

pub use context::{ContextConfig, ContextEnricher, ContextOutcome, EnrichmentReport, FallbackReason};
pub use window::TimeWindowChunker;

use crate::config::ChunkingSettings;
use crate::error::{LecternError, Result};
use crate::transcript::format_timestamp;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A time-bounded span of transcript text.
///
/// `raw_text` never changes after creation; `contextualized_text` always ends
/// with `raw_text` verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub video_id: String,
    /// Start time in seconds.
    pub start_time: f64,
    /// End time in seconds.
    pub end_time: f64,
    pub raw_text: String,
    pub contextualized_text: String,
    /// Position of this chunk within its video.
    pub order: u32,
}

impl Chunk {
    /// Create a chunk whose contextualized text is the raw text alone.
    pub fn new(
        video_id: impl Into<String>,
        start_time: f64,
        end_time: f64,
        raw_text: impl Into<String>,
        order: u32,
    ) -> Self {
        let raw_text = raw_text.into();
        Self {
            id: Uuid::new_v4().to_string(),
            video_id: video_id.into(),
            start_time,
            end_time,
            contextualized_text: raw_text.clone(),
            raw_text,
            order,
        }
    }

    /// Replace the situational prefix, keeping the raw text as the suffix.
    pub fn set_context(&mut self, prefix: &str) {
        let prefix = prefix.trim();
        self.contextualized_text = if prefix.is_empty() {
            self.raw_text.clone()
        } else {
            format!("{}\n\n{}", prefix, self.raw_text)
        };
    }

    /// The prefix currently in front of the raw text, if any.
    pub fn context_prefix(&self) -> Option<&str> {
        self.contextualized_text
            .strip_suffix(self.raw_text.as_str())
            .map(|p| p.trim_end())
            .filter(|p| !p.is_empty())
    }

    /// Duration of this chunk in seconds.
    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }

    /// Format the start timestamp for display.
    pub fn format_timestamp(&self) -> String {
        format_timestamp(self.start_time)
    }
}

/// Window parameters for [`TimeWindowChunker`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkingConfig {
    /// Window length in seconds.
    pub chunk_duration: f64,
    /// Overlap between consecutive windows in seconds.
    pub overlap_duration: f64,
}

impl ChunkingConfig {
    /// Validated window parameters.
    pub fn new(chunk_duration: f64, overlap_duration: f64) -> Result<Self> {
        if !(chunk_duration.is_finite() && chunk_duration > 0.0) {
            return Err(LecternError::Config(format!(
                "chunk duration must be positive, got {}",
                chunk_duration
            )));
        }
        if !(overlap_duration.is_finite() && overlap_duration >= 0.0) {
            return Err(LecternError::Config(format!(
                "overlap must be non-negative, got {}",
                overlap_duration
            )));
        }
        if overlap_duration >= chunk_duration {
            return Err(LecternError::Config(format!(
                "overlap ({}) must be smaller than chunk duration ({})",
                overlap_duration, chunk_duration
            )));
        }
        Ok(Self {
            chunk_duration,
            overlap_duration,
        })
    }

    /// Distance between consecutive window starts.
    pub fn step(&self) -> f64 {
        self.chunk_duration - self.overlap_duration
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_duration: 60.0,
            overlap_duration: 10.0,
        }
    }
}

impl TryFrom<&ChunkingSettings> for ChunkingConfig {
    type Error = LecternError;

    fn try_from(settings: &ChunkingSettings) -> Result<Self> {
        Self::new(settings.chunk_duration_seconds, settings.overlap_seconds)
    }
}
