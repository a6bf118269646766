//! OpenAI chat completion backend.

use super::{Generation, TextGenerator};
use crate::error::{LecternError, Result, Service};
use crate::openai::create_client;
use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs, FinishReason,
};
use async_openai::Client;
use async_trait::async_trait;
use tracing::debug;

/// Chat-completion generator backed by the OpenAI API.
pub struct OpenAIGenerator {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAIGenerator {
    pub fn new(model: &str) -> Result<Self> {
        Ok(Self {
            client: create_client()?,
            model: model.to_string(),
        })
    }
}

fn request_error(e: impl std::fmt::Display) -> LecternError {
    LecternError::upstream(Service::Generation, e.to_string())
}

#[async_trait]
impl TextGenerator for OpenAIGenerator {
    async fn generate(
        &self,
        prompt: &str,
        system_prompt: &str,
        max_output_tokens: u32,
    ) -> Result<Generation> {
        let messages: Vec<ChatCompletionRequestMessage> = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(system_prompt)
                .build()
                .map_err(request_error)?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(prompt)
                .build()
                .map_err(request_error)?
                .into(),
        ];

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .max_completion_tokens(max_output_tokens)
            .temperature(0.3)
            .build()
            .map_err(request_error)?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| request_error(format!("Failed to generate context: {}", e)))?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| request_error("Empty response from LLM"))?;

        let text = choice.message.content.unwrap_or_default();

        if choice.finish_reason == Some(FinishReason::Length) {
            debug!(
                "Generation hit the {} token budget ({} chars produced)",
                max_output_tokens,
                text.len()
            );
            return Ok(Generation::BudgetExceeded {
                partial: text,
                budget: max_output_tokens,
            });
        }

        Ok(Generation::Complete(text))
    }

    fn model(&self) -> &str {
        &self.model
    }
}
