//! Search command implementation.

use crate::cli::preflight::{self, Operation};
use crate::cli::Output;
use crate::config::Settings;
use crate::orchestrator::Orchestrator;
use crate::query::QueryOptions;
use anyhow::Result;

/// Run the search command.
pub async fn run_search(query: &str, options: QueryOptions, json: bool, settings: Settings) -> Result<()> {
    preflight::check(Operation::Search, &settings)?;

    let orchestrator = Orchestrator::new(settings)?;
    let engine = orchestrator.query_engine()?;

    let spinner = Output::spinner("Searching...");
    let results = engine.search(query, &options).await;
    spinner.finish_and_clear();

    let results = match results {
        Ok(results) => results,
        Err(e) => {
            Output::error(&format!("Search failed: {}", e));
            return Err(e.into());
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    if results.is_empty() {
        Output::warning("No results found matching your query.");
        return Ok(());
    }

    Output::success(&format!("Found {} results", results.len()));
    for (i, candidate) in results.iter().enumerate() {
        Output::search_result(i + 1, candidate);
    }

    Ok(())
}
