//! Configuration module for Lectern.
//!
//! Handles loading and managing application settings and prompt templates.

mod prompts;
mod settings;

pub use prompts::{ContextPrompts, Prompts};
pub use settings::{
    ChunkingSettings, ContextSettings, EmbeddingSettings, GeneralSettings, MetadataSettings,
    PromptSettings, RerankProvider, RerankSettings, RetrievalSettings, Settings,
    VectorStoreSettings,
};
