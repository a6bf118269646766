//! Transcript data models.

use crate::error::{LecternError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A single time-stamped unit of transcribed speech.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    /// Start time in seconds.
    #[serde(alias = "start_seconds")]
    pub start: f64,
    /// End time in seconds.
    #[serde(alias = "end_seconds")]
    pub end: f64,
    /// Transcribed text content.
    pub text: String,
}

impl Segment {
    /// Create a new segment.
    pub fn new(start: f64, end: f64, text: impl Into<String>) -> Self {
        Self {
            start,
            end,
            text: text.into(),
        }
    }

    /// Duration of this segment in seconds.
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    /// Whether the segment intersects the half-open window `[start, end)`.
    pub fn overlaps(&self, start: f64, end: f64) -> bool {
        self.start < end && self.end > start
    }
}

/// An ordered list of segments for one video, as produced by the
/// transcription step (Whisper-style JSON with a `segments` array).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Transcript {
    pub segments: Vec<Segment>,
}

impl Transcript {
    /// Create a transcript from segments.
    pub fn new(segments: Vec<Segment>) -> Self {
        Self { segments }
    }

    /// Parse a transcript from JSON, rejecting malformed segments.
    pub fn from_json(json: &str) -> Result<Self> {
        let transcript: Transcript = serde_json::from_str(json)?;
        transcript.validate()?;
        Ok(transcript)
    }

    /// Load a transcript JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Check that every segment has finite, ordered, non-negative bounds.
    pub fn validate(&self) -> Result<()> {
        validate_segments(&self.segments)
    }

    /// Latest segment end, or 0 for an empty transcript.
    pub fn duration_seconds(&self) -> f64 {
        self.segments.iter().map(|s| s.end).fold(0.0, f64::max)
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

/// Reject segments with non-finite bounds, negative starts, or an end
/// before the start.
pub fn validate_segments(segments: &[Segment]) -> Result<()> {
    for (i, seg) in segments.iter().enumerate() {
        if !seg.start.is_finite() || !seg.end.is_finite() {
            return Err(LecternError::InvalidInput(format!(
                "segment {} has non-finite bounds",
                i
            )));
        }
        if seg.start < 0.0 {
            return Err(LecternError::InvalidInput(format!(
                "segment {} starts at negative time {:.2}s",
                i, seg.start
            )));
        }
        if seg.end < seg.start {
            return Err(LecternError::InvalidInput(format!(
                "segment {} ends ({:.2}s) before it starts ({:.2}s)",
                i, seg.end, seg.start
            )));
        }
    }
    Ok(())
}

/// Format seconds as MM:SS or HH:MM:SS.
pub fn format_timestamp(seconds: f64) -> String {
    let total_seconds = seconds.max(0.0) as u32;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let secs = total_seconds % 60;

    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{:02}:{:02}", minutes, secs)
    }
}
