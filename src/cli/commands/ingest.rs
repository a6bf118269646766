//! Ingest command implementation.

use crate::cli::preflight::{self, Operation};
use crate::cli::Output;
use crate::config::Settings;
use crate::orchestrator::{IngestResult, Orchestrator};
use crate::transcript::{Transcript, VideoManifest, VideoMetadata};
use anyhow::{Context, Result};
use std::path::Path;

/// Metadata for a single-transcript ingestion.
pub struct VideoArgs {
    pub chapter: String,
    pub title: String,
    pub url: String,
    pub id: Option<String>,
}

/// Ingest one transcript file.
pub async fn run_ingest(transcript_path: &Path, video: VideoArgs, settings: Settings) -> Result<()> {
    preflight::check(Operation::Ingest, &settings)?;

    let transcript = Transcript::load(transcript_path)
        .with_context(|| format!("Failed to load transcript {}", transcript_path.display()))?;

    let mut metadata = VideoMetadata::new(video.chapter, video.title, video.url)
        .with_duration(Some(transcript.duration_seconds().ceil() as u32));
    if let Some(id) = video.id {
        metadata = metadata.with_id(id);
    }

    let orchestrator = Orchestrator::new(settings)?;

    Output::info(&format!("Ingesting '{}' ({} segments)", metadata.title, transcript.segments.len()));
    let spinner = Output::spinner("Chunking, enriching and indexing...");
    let result = orchestrator.ingest(&metadata, &transcript).await;
    spinner.finish_and_clear();

    match result {
        Ok(result) => {
            print_result(&result);
            Ok(())
        }
        Err(e) => {
            Output::error(&format!("Ingestion failed: {}", e));
            Err(e.into())
        }
    }
}

/// Ingest every video listed in a manifest.
pub async fn run_ingest_manifest(manifest_path: &Path, settings: Settings) -> Result<()> {
    preflight::check(Operation::Ingest, &settings)?;

    let manifest = VideoManifest::load(manifest_path)
        .with_context(|| format!("Failed to load manifest {}", manifest_path.display()))?;
    let orchestrator = Orchestrator::new(settings)?;

    Output::info(&format!("Ingesting {} videos", manifest.videos.len()));
    let spinner = Output::spinner("Chunking, enriching and indexing...");
    let report = orchestrator.ingest_manifest(&manifest).await;
    spinner.finish_and_clear();
    let report = report?;

    for result in &report.ingested {
        print_result(result);
    }
    for (video_id, error) in &report.failed {
        Output::error(&format!("{}: {}", video_id, error));
    }

    println!();
    Output::info(&format!(
        "Ingestion complete: {} succeeded, {} failed",
        report.ingested.len(),
        report.failed.len()
    ));

    if report.ingested.is_empty() && !report.failed.is_empty() {
        anyhow::bail!("No videos were ingested");
    }
    Ok(())
}

fn print_result(result: &IngestResult) {
    Output::success(&format!(
        "Indexed '{}' ({} chunks)",
        result.title, result.chunks_indexed
    ));
    if result.context_fallbacks > 0 && result.contexts_generated > 0 {
        Output::warning(&format!(
            "  {} chunks used the fallback context",
            result.context_fallbacks
        ));
    }
    Output::kv("Video ID", &result.video_id);
}
