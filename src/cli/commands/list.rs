//! List command implementation.

use crate::cli::Output;
use crate::config::Settings;
use crate::orchestrator::Orchestrator;
use anyhow::Result;

/// Run the list command.
pub async fn run_list(settings: Settings) -> Result<()> {
    let orchestrator = Orchestrator::new(settings)?;

    match orchestrator.list_videos().await {
        Ok(videos) => {
            if videos.is_empty() {
                Output::info("No videos ingested yet. Use 'lectern ingest <transcript>' to add content.");
            } else {
                Output::header(&format!("Ingested Videos ({})", videos.len()));
                println!();

                for record in &videos {
                    Output::video_info(record);
                }

                let total_chunks: u32 = videos.iter().map(|v| v.chunk_count).sum();
                println!();
                Output::kv("Total videos", &videos.len().to_string());
                Output::kv("Total chunks", &total_chunks.to_string());
            }
        }
        Err(e) => {
            Output::error(&format!("Failed to list videos: {}", e));
            return Err(e.into());
        }
    }

    Ok(())
}
