//! Error types for Lectern.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// External collaborator a call was made against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    Embedding,
    VectorStore,
    MetadataStore,
    Generation,
    Reranker,
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Service::Embedding => "embedding service",
            Service::VectorStore => "vector store",
            Service::MetadataStore => "metadata store",
            Service::Generation => "text generation service",
            Service::Reranker => "reranker",
        };
        f.write_str(name)
    }
}

/// Library-level error type for Lectern operations.
#[derive(Error, Debug)]
pub enum LecternError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{service} unavailable: {message}")]
    Upstream { service: Service, message: String },

    #[error("{service} timed out after {after:?}")]
    Timeout { service: Service, after: Duration },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Video not found: {0}")]
    VideoNotFound(String),

    #[error("Background task failed: {0}")]
    Task(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl LecternError {
    /// Shorthand for an upstream failure against `service`.
    pub fn upstream(service: Service, message: impl Into<String>) -> Self {
        LecternError::Upstream {
            service,
            message: message.into(),
        }
    }

    /// True when the failure came from an external collaborator and the
    /// caller may retry or back off.
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            LecternError::Upstream { .. }
                | LecternError::Timeout { .. }
                | LecternError::Http(_)
                | LecternError::Database(_)
        )
    }
}

/// Result type alias for Lectern operations.
pub type Result<T> = std::result::Result<T, LecternError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_classification() {
        let err = LecternError::upstream(Service::VectorStore, "connection refused");
        assert!(err.is_upstream());
        assert_eq!(err.to_string(), "vector store unavailable: connection refused");

        let err = LecternError::Timeout {
            service: Service::Embedding,
            after: Duration::from_secs(3),
        };
        assert!(err.is_upstream());

        assert!(!LecternError::Config("bad".to_string()).is_upstream());
        assert!(!LecternError::InvalidInput("bad".to_string()).is_upstream());
    }
}
