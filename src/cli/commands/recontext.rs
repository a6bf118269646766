//! Recontext command implementation.

use crate::cli::preflight::{self, Operation};
use crate::cli::Output;
use crate::config::Settings;
use crate::orchestrator::Orchestrator;
use anyhow::Result;

/// Run the recontext command.
pub async fn run_recontext(video_id: &str, settings: Settings) -> Result<()> {
    preflight::check(Operation::Ingest, &settings)?;
    let orchestrator = Orchestrator::new(settings)?;

    if video_id == "all" {
        let videos = orchestrator.list_videos().await?;

        if videos.is_empty() {
            Output::warning("No ingested videos found.");
            return Ok(());
        }

        Output::info(&format!("Found {} videos to recontext", videos.len()));
        println!();

        let progress = Output::progress_bar(videos.len() as u64, "Recontexting");
        let mut success_count = 0;
        let mut error_count = 0;

        for record in &videos {
            progress.set_message(record.video.title.clone());
            match orchestrator.recontext(&record.video.id).await {
                Ok(_) => success_count += 1,
                Err(e) => {
                    progress.suspend(|| Output::error(&format!("{}: {}", record.video.id, e)));
                    error_count += 1;
                }
            }
            progress.inc(1);
        }
        progress.finish_and_clear();

        Output::info(&format!(
            "Recontext complete: {} succeeded, {} failed",
            success_count, error_count
        ));
    } else {
        Output::info(&format!("Recontexting video: {}", video_id));

        let spinner = Output::spinner("Regenerating context...");

        match orchestrator.recontext(video_id).await {
            Ok(result) => {
                spinner.finish_and_clear();
                Output::success(&format!(
                    "Regenerated context for '{}' ({} chunks, {} fallbacks)",
                    result.title, result.chunks_indexed, result.context_fallbacks
                ));
            }
            Err(e) => {
                spinner.finish_and_clear();
                Output::error(&format!("Failed to recontext: {}", e));
                return Err(e.into());
            }
        }
    }

    Ok(())
}
