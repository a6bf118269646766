//! Text generation used to write situational context for chunks.

mod openai;

pub use openai::OpenAIGenerator;

use crate::error::Result;
use async_trait::async_trait;

/// Result of a single generation call.
#[derive(Debug, Clone, PartialEq)]
pub enum Generation {
    /// The model finished on its own.
    Complete(String),
    /// The model stopped because it hit the output token budget.
    BudgetExceeded {
        /// Whatever text was produced before the cutoff.
        partial: String,
        budget: u32,
    },
}

/// Trait for text generation backends.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate a completion for `prompt` with at most `max_output_tokens`.
    async fn generate(
        &self,
        prompt: &str,
        system_prompt: &str,
        max_output_tokens: u32,
    ) -> Result<Generation>;

    /// Model identifier, for logging.
    fn model(&self) -> &str;
}
