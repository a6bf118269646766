//! Transcript input for ingestion.
//!
//! Transcripts arrive from the upstream transcription step as ordered,
//! time-stamped segments. Each one belongs to a video described by
//! [`VideoMetadata`]; batches of videos are listed in a [`VideoManifest`].

mod models;
mod video;

pub use models::{format_timestamp, validate_segments, Segment, Transcript};
pub use video::{clean_title, derive_video_id, ManifestEntry, VideoManifest, VideoMetadata};
