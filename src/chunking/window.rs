//! Time-window chunking implementation.
//!
//! Splits transcripts into overlapping fixed-duration chunks.

use super::{Chunk, ChunkingConfig};
use crate::error::Result;
use crate::transcript::{validate_segments, Segment};
use tracing::debug;

/// Overlapping fixed-duration chunker.
///
/// A segment belongs to every window its interval overlaps, so a segment
/// longer than the window still lands in a chunk. A chunk's bounds are the
/// earliest start and latest end of its member segments, not the window's.
#[derive(Debug, Clone, Default)]
pub struct TimeWindowChunker {
    config: ChunkingConfig,
}

impl TimeWindowChunker {
    pub fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    /// Split `segments` into chunks for `video_id`.
    pub fn chunk(&self, video_id: &str, segments: &[Segment]) -> Result<Vec<Chunk>> {
        validate_segments(segments)?;

        if segments.is_empty() {
            return Ok(Vec::new());
        }

        let mut ordered: Vec<&Segment> = segments.iter().collect();
        ordered.sort_by(|a, b| a.start.total_cmp(&b.start).then(a.end.total_cmp(&b.end)));

        let horizon = ordered.iter().map(|s| s.end).fold(0.0, f64::max);
        let step = self.config.step();

        let mut chunks: Vec<Chunk> = Vec::new();
        let mut previous_members: Vec<usize> = Vec::new();
        // Segments that started before the current window's end and have not
        // yet fallen behind its start. Window starts only grow, so each
        // segment enters and leaves this list once.
        let mut active: Vec<usize> = Vec::new();
        let mut next = 0;
        let mut window: u64 = 0;

        loop {
            let window_start = window as f64 * step;
            let window_end = window_start + self.config.chunk_duration;

            while next < ordered.len() && ordered[next].start < window_end {
                active.push(next);
                next += 1;
            }
            active.retain(|&i| in_window(ordered[i], window_start, window_end));

            if active.is_empty() {
                // Silence gap: jump to the first window that can reach the next segment.
                let Some(upcoming) = ordered.get(next) else {
                    break;
                };
                window = self.first_window_reaching(upcoming.start).max(window + 1);
                continue;
            }

            if active != previous_members {
                if let Some(chunk) = build_chunk(video_id, &ordered, &active, chunks.len() as u32) {
                    chunks.push(chunk);
                } else {
                    debug!(
                        "Skipping degenerate window at {:.1}s for {}",
                        window_start, video_id
                    );
                }
                previous_members.clone_from(&active);
            }

            window += 1;
            if window as f64 * step >= horizon {
                break;
            }
        }

        debug!("Created {} chunks for {}", chunks.len(), video_id);
        Ok(chunks)
    }

    /// Index of the first window whose end passes `time`, or one before it
    /// when rounding lands short.
    fn first_window_reaching(&self, time: f64) -> u64 {
        let reach = ((time - self.config.chunk_duration) / self.config.step()).floor();
        if reach > 0.0 {
            reach as u64
        } else {
            0
        }
    }
}

/// Zero-length segments are instants and belong to the window containing them.
fn in_window(seg: &Segment, start: f64, end: f64) -> bool {
    if seg.end > seg.start {
        seg.overlaps(start, end)
    } else {
        seg.start >= start && seg.start < end
    }
}

fn build_chunk(video_id: &str, ordered: &[&Segment], members: &[usize], order: u32) -> Option<Chunk> {
    let start = members
        .iter()
        .map(|&i| ordered[i].start)
        .fold(f64::INFINITY, f64::min);
    let end = members
        .iter()
        .map(|&i| ordered[i].end)
        .fold(f64::NEG_INFINITY, f64::max);

    if start >= end {
        return None;
    }

    let text = members
        .iter()
        .map(|&i| ordered[i].text.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    if text.is_empty() {
        return None;
    }

    Some(Chunk::new(video_id, start, end, text, order))
}
