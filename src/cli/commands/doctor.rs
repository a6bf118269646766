//! Doctor command - verify configuration and collaborators.

use crate::cli::Output;
use crate::config::{RerankProvider, Settings};
use crate::metadata::{MetadataStore, SqliteMetadataStore};
use crate::rerank::{HttpRelevanceModel, RelevanceModel};
use console::style;
use std::path::Path;

/// Check result for a single item.
#[derive(Debug)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, PartialEq)]
pub enum CheckStatus {
    Ok,
    Warning,
    Error,
}

impl CheckResult {
    fn ok(name: &str, message: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Ok,
            message: message.to_string(),
            hint: None,
        }
    }

    fn warning(name: &str, message: &str, hint: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Warning,
            message: message.to_string(),
            hint: Some(hint.to_string()),
        }
    }

    fn error(name: &str, message: &str, hint: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Error,
            message: message.to_string(),
            hint: Some(hint.to_string()),
        }
    }

    fn print(&self) {
        let icon = match self.status {
            CheckStatus::Ok => style("✓").green(),
            CheckStatus::Warning => style("!").yellow(),
            CheckStatus::Error => style("✗").red(),
        };

        println!("  {} {} - {}", icon, style(&self.name).bold(), self.message);

        if let Some(hint) = &self.hint {
            println!("    {} {}", style("→").dim(), style(hint).dim());
        }
    }
}

/// Run all diagnostic checks.
pub async fn run_doctor(settings: &Settings, config_path: &Path) -> anyhow::Result<()> {
    Output::header("Lectern Doctor");
    println!();
    println!("Checking configuration and services...\n");

    let mut checks = Vec::new();

    let sections = [
        ("API Configuration", vec![check_openai_api_key(std::env::var("OPENAI_API_KEY").ok())]),
        ("Configuration", vec![check_config_file(config_path), check_settings(settings)]),
        ("Storage", check_storage(settings)),
        ("Index", vec![check_index(settings).await]),
        ("Reranker", vec![check_reranker(settings).await]),
    ];

    for (title, results) in sections {
        println!("{}", style(title).bold());
        for check in &results {
            check.print();
        }
        println!();
        checks.extend(results);
    }

    // Summary
    let errors = checks.iter().filter(|c| c.status == CheckStatus::Error).count();
    let warnings = checks.iter().filter(|c| c.status == CheckStatus::Warning).count();

    if errors > 0 {
        Output::error(&format!(
            "{} error(s) found. Please fix them before using Lectern.",
            errors
        ));
        anyhow::bail!("doctor found {} error(s)", errors);
    } else if warnings > 0 {
        Output::warning(&format!("All checks passed with {} warning(s).", warnings));
    } else {
        Output::success("All checks passed! Lectern is ready to use.");
    }

    Ok(())
}

/// Check if OpenAI API key is configured.
fn check_openai_api_key(key: Option<String>) -> CheckResult {
    match key {
        Some(key) if key.is_ascii() && key.starts_with("sk-") && key.len() > 20 => {
            let masked = format!("{}...{}", &key[..7], &key[key.len() - 4..]);
            CheckResult::ok("OPENAI_API_KEY", &format!("configured ({})", masked))
        }
        Some(key) if key.trim().is_empty() => CheckResult::error(
            "OPENAI_API_KEY",
            "empty",
            "Set with: export OPENAI_API_KEY='sk-...'",
        ),
        Some(_) => CheckResult::warning(
            "OPENAI_API_KEY",
            "set but format looks unusual",
            "Expected format: sk-... (OpenAI API key)",
        ),
        None => CheckResult::error(
            "OPENAI_API_KEY",
            "not set",
            "Set with: export OPENAI_API_KEY='sk-...'",
        ),
    }
}

/// Check if config file exists.
fn check_config_file(config_path: &Path) -> CheckResult {
    if config_path.exists() {
        CheckResult::ok("Config file", &format!("{}", config_path.display()))
    } else {
        CheckResult::warning(
            "Config file",
            "using defaults",
            "Create with: lectern init (or lectern config edit)",
        )
    }
}

fn check_settings(settings: &Settings) -> CheckResult {
    match settings.validate() {
        Ok(()) => CheckResult::ok(
            "Settings",
            &format!(
                "{}s windows, {}s overlap, rerank {}",
                settings.chunking.chunk_duration_seconds,
                settings.chunking.overlap_seconds,
                if settings.rerank.enabled { "on" } else { "off" }
            ),
        ),
        Err(e) => CheckResult::error("Settings", &e.to_string(), "Fix with: lectern config edit"),
    }
}

/// Check data directory and databases.
fn check_storage(settings: &Settings) -> Vec<CheckResult> {
    let mut results = Vec::new();

    let data_dir = settings.data_dir();
    if data_dir.exists() {
        results.push(CheckResult::ok("Data directory", &format!("{}", data_dir.display())));
    } else {
        results.push(CheckResult::warning(
            "Data directory",
            &format!("{} (will be created)", data_dir.display()),
            "Directory will be created on first use",
        ));
    }

    let mut databases = vec![("Metadata store", settings.metadata_path())];
    if settings.vector_store.provider == "sqlite" && settings.vector_store_path() != settings.metadata_path() {
        databases.push(("Vector store", settings.vector_store_path()));
    }

    for (name, path) in databases {
        if path.exists() {
            let size = std::fs::metadata(&path)
                .map(|m| format_size(m.len()))
                .unwrap_or_else(|_| "unknown size".to_string());
            results.push(CheckResult::ok(name, &format!("{} ({})", path.display(), size)));
        } else {
            results.push(CheckResult::warning(
                name,
                &format!("{} (not created yet)", path.display()),
                "Database will be created on first ingestion",
            ));
        }
    }

    results
}

/// Count ingested videos and chunks.
async fn check_index(settings: &Settings) -> CheckResult {
    let path = settings.metadata_path();
    if !path.exists() {
        return CheckResult::warning("Corpus", "empty", "Add content with: lectern ingest");
    }

    let store = match SqliteMetadataStore::new(&path) {
        Ok(store) => store,
        Err(e) => return CheckResult::error("Corpus", &e.to_string(), "Check the metadata store path"),
    };

    match store.list_videos().await {
        Ok(videos) if videos.is_empty() => {
            CheckResult::warning("Corpus", "no videos", "Add content with: lectern ingest")
        }
        Ok(videos) => {
            let chunks: u32 = videos.iter().map(|v| v.chunk_count).sum();
            CheckResult::ok("Corpus", &format!("{} videos, {} chunks", videos.len(), chunks))
        }
        Err(e) => CheckResult::error("Corpus", &e.to_string(), "Check the metadata store path"),
    }
}

/// Send one scoring request to the reranker.
async fn check_reranker(settings: &Settings) -> CheckResult {
    let rerank = &settings.rerank;
    if !rerank.enabled {
        return CheckResult::ok("Reranker", "disabled");
    }
    if rerank.provider == RerankProvider::Overlap {
        return CheckResult::ok("Reranker", "local term overlap");
    }

    let hint = "Start a cross-encoder server or set rerank.provider = \"overlap\"";
    let model = match HttpRelevanceModel::new(&rerank.endpoint, rerank.timeout()) {
        Ok(model) => model,
        Err(e) => return CheckResult::error("Reranker", &e.to_string(), hint),
    };

    match model.score("ping", &["ping".to_string()]).await {
        Ok(_) => CheckResult::ok("Reranker", &rerank.endpoint),
        Err(e) => CheckResult::warning("Reranker", &format!("{} ({})", rerank.endpoint, e), hint),
    }
}

/// Format file size in human-readable format.
fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
