//! Remove command implementation.

use crate::cli::Output;
use crate::config::Settings;
use crate::orchestrator::Orchestrator;
use anyhow::Result;

/// Run the remove command.
pub async fn run_remove(video_id: &str, settings: Settings) -> Result<()> {
    let orchestrator = Orchestrator::new(settings)?;

    match orchestrator.remove_video(video_id).await {
        Ok(removed) => {
            Output::success(&format!("Removed '{}' ({} chunks)", video_id, removed));
            Ok(())
        }
        Err(e) => {
            Output::error(&format!("Failed to remove: {}", e));
            Err(e.into())
        }
    }
}
