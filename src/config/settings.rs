//! Configuration settings for Lectern.

use crate::error::{LecternError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Settings {
    pub general: GeneralSettings,
    pub chunking: ChunkingSettings,
    pub context: ContextSettings,
    pub embedding: EmbeddingSettings,
    pub vector_store: VectorStoreSettings,
    pub metadata: MetadataSettings,
    pub retrieval: RetrievalSettings,
    pub rerank: RerankSettings,
    pub prompts: PromptSettings,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    /// Directory for storing application data.
    pub data_dir: String,
    /// Log level (trace, debug, info, warn, error) used when `-v` is not given.
    pub log_level: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            data_dir: "~/.lectern".to_string(),
            log_level: "warn".to_string(),
        }
    }
}

/// Time-window chunking settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingSettings {
    /// Window length in seconds.
    pub chunk_duration_seconds: f64,
    /// Overlap between consecutive windows in seconds.
    pub overlap_seconds: f64,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self {
            chunk_duration_seconds: 60.0,
            overlap_seconds: 10.0,
        }
    }
}

/// Contextual prefix generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextSettings {
    /// Call the generation model; when false every chunk gets the templated prefix.
    pub enabled: bool,
    /// Model used to write chunk prefixes.
    pub model: String,
    /// Initial output token budget for a prefix.
    pub token_budget: u32,
    /// Budget added on each retry after the model runs out of tokens.
    pub budget_increment: u32,
    /// Total attempts before falling back to the template.
    pub max_attempts: u32,
    /// Prefix generations in flight at once.
    pub max_concurrent: usize,
    /// Deadline for a single generation call.
    pub timeout_seconds: u64,
}

impl ContextSettings {
    /// Deadline for a single call.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            model: "gpt-4o-mini".to_string(),
            token_budget: 200,
            budget_increment: 100,
            max_attempts: 3,
            max_concurrent: 4,
            timeout_seconds: 60,
        }
    }
}

/// Embedding generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    /// Embedding model to use.
    pub model: String,
    /// Embedding dimensions.
    pub dimensions: u32,
    /// Texts per embedding request during ingestion.
    pub batch_size: usize,
    pub timeout_seconds: u64,
}

impl EmbeddingSettings {
    /// Deadline for a single call.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            model: "text-embedding-3-small".to_string(),
            dimensions: 1536,
            batch_size: 100,
            timeout_seconds: 30,
        }
    }
}

/// Vector store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorStoreSettings {
    /// Vector store provider (sqlite, memory).
    pub provider: String,
    /// Path to SQLite database (for sqlite provider).
    pub sqlite_path: String,
    /// Hits below this cosine similarity are dropped before fusion.
    pub score_threshold: f32,
    pub timeout_seconds: u64,
}

impl VectorStoreSettings {
    /// Deadline for a single call.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl Default for VectorStoreSettings {
    fn default() -> Self {
        Self {
            provider: "sqlite".to_string(),
            sqlite_path: "~/.lectern/lectern.db".to_string(),
            score_threshold: 0.5,
            timeout_seconds: 10,
        }
    }
}

/// Relational metadata store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataSettings {
    pub sqlite_path: String,
    pub timeout_seconds: u64,
}

impl MetadataSettings {
    /// Deadline for a single call.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl Default for MetadataSettings {
    fn default() -> Self {
        Self {
            sqlite_path: "~/.lectern/lectern.db".to_string(),
            timeout_seconds: 10,
        }
    }
}

/// Hybrid retrieval settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    /// Candidates requested from the vector index.
    pub vector_top_k: usize,
    /// Candidates requested from the BM25 index.
    pub bm25_top_k: usize,
    /// Candidates kept after fusion.
    pub top_k: usize,
    /// Include lexical search in fusion.
    pub use_bm25: bool,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            vector_top_k: 150,
            bm25_top_k: 150,
            top_k: 150,
            use_bm25: true,
        }
    }
}

/// Relevance model provider for reranking.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum RerankProvider {
    /// Cross-encoder served over HTTP.
    #[default]
    Http,
    /// Local query-term overlap scorer.
    Overlap,
}

impl std::str::FromStr for RerankProvider {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "http" | "tei" | "cross-encoder" => Ok(RerankProvider::Http),
            "overlap" | "local" => Ok(RerankProvider::Overlap),
            _ => Err(format!("Unknown rerank provider: {}", s)),
        }
    }
}

impl std::fmt::Display for RerankProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RerankProvider::Http => write!(f, "http"),
            RerankProvider::Overlap => write!(f, "overlap"),
        }
    }
}

/// Reranking settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankSettings {
    pub enabled: bool,
    pub provider: RerankProvider,
    /// Rerank endpoint (for the http provider).
    pub endpoint: String,
    /// Query-document pairs per inference call.
    pub batch_size: usize,
    /// Results kept after reranking.
    pub final_top_k: usize,
    pub timeout_seconds: u64,
}

impl RerankSettings {
    /// Deadline for a single call.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl Default for RerankSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            provider: RerankProvider::Http,
            endpoint: "http://localhost:8080/rerank".to_string(),
            batch_size: 32,
            final_top_k: 10,
            timeout_seconds: 30,
        }
    }
}

/// Prompt customization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct PromptSettings {
    /// Directory for custom prompts (overrides defaults).
    pub custom_dir: Option<String>,
    /// Custom variables available in all prompts as {{variable_name}}.
    pub variables: std::collections::HashMap<String, String>,
}

impl Settings {
    /// Load settings from the default configuration file.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load settings from a specific path, or default location if None.
    pub fn load_from(path: Option<&PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.clone(),
            None => Self::default_config_path(),
        };

        let settings = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)?
        } else {
            Settings::default()
        };

        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        let chunking = &self.chunking;
        if !(chunking.chunk_duration_seconds.is_finite() && chunking.chunk_duration_seconds > 0.0) {
            return Err(LecternError::Config(format!(
                "chunking.chunk_duration_seconds must be positive, got {}",
                chunking.chunk_duration_seconds
            )));
        }
        if !(chunking.overlap_seconds.is_finite() && chunking.overlap_seconds >= 0.0) {
            return Err(LecternError::Config(format!(
                "chunking.overlap_seconds must be non-negative, got {}",
                chunking.overlap_seconds
            )));
        }
        if chunking.overlap_seconds >= chunking.chunk_duration_seconds {
            return Err(LecternError::Config(format!(
                "chunking.overlap_seconds ({}) must be smaller than chunk_duration_seconds ({})",
                chunking.overlap_seconds, chunking.chunk_duration_seconds
            )));
        }

        if self.context.max_attempts == 0 || self.context.max_concurrent == 0 {
            return Err(LecternError::Config(
                "context.max_attempts and context.max_concurrent must be at least 1".to_string(),
            ));
        }

        let sizes = [
            ("embedding.batch_size", self.embedding.batch_size),
            ("retrieval.vector_top_k", self.retrieval.vector_top_k),
            ("retrieval.bm25_top_k", self.retrieval.bm25_top_k),
            ("retrieval.top_k", self.retrieval.top_k),
            ("rerank.batch_size", self.rerank.batch_size),
            ("rerank.final_top_k", self.rerank.final_top_k),
        ];
        if let Some((name, _)) = sizes.iter().find(|(_, v)| *v == 0) {
            return Err(LecternError::Config(format!("{} must be at least 1", name)));
        }

        let threshold = self.vector_store.score_threshold;
        if !(-1.0..=1.0).contains(&threshold) {
            return Err(LecternError::Config(format!(
                "vector_store.score_threshold must be within [-1, 1], got {}",
                threshold
            )));
        }

        Ok(())
    }

    /// Save settings to the default configuration file.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::default_config_path())
    }

    /// Save settings to a specific path.
    pub fn save_to(&self, path: &PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| LecternError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lectern")
            .join("config.toml")
    }

    /// Expand shell variables in paths (e.g., ~).
    pub fn expand_path(path: &str) -> PathBuf {
        PathBuf::from(shellexpand::tilde(path).to_string())
    }

    /// Get the expanded data directory path.
    pub fn data_dir(&self) -> PathBuf {
        Self::expand_path(&self.general.data_dir)
    }

    /// Tracing level for the `lectern` target given the number of `-v` flags.
    pub fn log_level(&self, verbose: u8) -> &str {
        match verbose {
            0 => &self.general.log_level,
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }

    /// Get the expanded vector database path.
    pub fn vector_store_path(&self) -> PathBuf {
        Self::expand_path(&self.vector_store.sqlite_path)
    }

    /// Get the expanded metadata database path.
    pub fn metadata_path(&self) -> PathBuf {
        Self::expand_path(&self.metadata.sqlite_path)
    }
}
