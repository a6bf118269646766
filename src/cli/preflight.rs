//! Pre-flight checks before expensive operations.
//!
//! Validates that required credentials and endpoints are configured
//! before starting operations that would otherwise fail midway.

use crate::config::{RerankProvider, Settings};
use crate::error::{LecternError, Result};

/// Requirements for different operations.
#[derive(Debug, Clone, Copy)]
pub enum Operation {
    /// Ingestion embeds chunks and may call the generation model.
    Ingest,
    /// Search embeds the query and may call the reranker.
    Search,
}

/// Run pre-flight checks for the given operation.
///
/// Returns Ok(()) if all checks pass, or an error describing what's missing.
pub fn check(operation: Operation, settings: &Settings) -> Result<()> {
    check_api_key(std::env::var("OPENAI_API_KEY").ok().as_deref())?;
    if let Operation::Search = operation {
        check_rerank_endpoint(settings)?;
    }
    Ok(())
}

fn check_api_key(key: Option<&str>) -> Result<()> {
    match key {
        Some(key) if !key.trim().is_empty() => Ok(()),
        Some(_) => Err(LecternError::Config(
            "OPENAI_API_KEY is empty. Set it with: export OPENAI_API_KEY='sk-...'".to_string(),
        )),
        None => Err(LecternError::Config(
            "OPENAI_API_KEY not set. Set it with: export OPENAI_API_KEY='sk-...'".to_string(),
        )),
    }
}

fn check_rerank_endpoint(settings: &Settings) -> Result<()> {
    let rerank = &settings.rerank;
    if !rerank.enabled || rerank.provider != RerankProvider::Http {
        return Ok(());
    }
    url::Url::parse(&rerank.endpoint).map_err(|e| {
        LecternError::Config(format!(
            "rerank.endpoint '{}' is not a valid URL: {}",
            rerank.endpoint, e
        ))
    })?;
    Ok(())
}
