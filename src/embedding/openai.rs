//! OpenAI embeddings implementation.

use super::Embedder;
use crate::config::EmbeddingSettings;
use crate::error::{LecternError, Result, Service};
use crate::openai::create_client;
use async_openai::types::{CreateEmbeddingRequestArgs, EmbeddingInput};
use async_trait::async_trait;
use tracing::{debug, instrument};

/// OpenAI-based embedder.
pub struct OpenAIEmbedder {
    client: async_openai::Client<async_openai::config::OpenAIConfig>,
    model: String,
    dimensions: usize,
    batch_size: usize,
}

impl OpenAIEmbedder {
    /// Create a new OpenAI embedder with default settings.
    pub fn new() -> Result<Self> {
        Self::with_config("text-embedding-3-small", 1536)
    }

    /// Create a new OpenAI embedder with custom model and dimensions.
    pub fn with_config(model: &str, dimensions: usize) -> Result<Self> {
        Ok(Self {
            client: create_client()?,
            model: model.to_string(),
            dimensions,
            batch_size: 100,
        })
    }

    /// Create an embedder from the `[embedding]` settings section.
    pub fn from_settings(settings: &EmbeddingSettings) -> Result<Self> {
        Ok(Self::with_config(&settings.model, settings.dimensions as usize)?
            .with_batch_size(settings.batch_size))
    }

    /// Texts sent per API request.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    #[instrument(skip(self, text))]
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let embeddings = self.embed_batch(&[text.to_string()]).await?;
        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| LecternError::upstream(Service::Embedding, "Empty embedding response"))
    }

    #[instrument(skip(self, texts), fields(count = texts.len()))]
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Generating embeddings for {} texts", texts.len());

        let mut all_embeddings = Vec::with_capacity(texts.len());

        for chunk in texts.chunks(self.batch_size) {
            let input: Vec<String> = chunk.to_vec();

            let request = CreateEmbeddingRequestArgs::default()
                .model(&self.model)
                .input(EmbeddingInput::StringArray(input))
                .dimensions(self.dimensions as u32)
                .build()
                .map_err(|e| {
                    LecternError::upstream(Service::Embedding, format!("Failed to build request: {}", e))
                })?;

            let response = self.client.embeddings().create(request).await.map_err(|e| {
                LecternError::upstream(Service::Embedding, format!("Embedding API error: {}", e))
            })?;

            // Sort by index to ensure correct order
            let mut embeddings: Vec<_> = response.data.into_iter().collect();
            embeddings.sort_by_key(|e| e.index);

            if embeddings.len() != chunk.len() {
                return Err(LecternError::upstream(
                    Service::Embedding,
                    format!("expected {} embeddings, got {}", chunk.len(), embeddings.len()),
                ));
            }

            for embedding_data in embeddings {
                all_embeddings.push(embedding_data.embedding);
            }
        }

        debug!("Generated {} embeddings", all_embeddings.len());
        Ok(all_embeddings)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedder_creation() {
        let embedder = OpenAIEmbedder::new().unwrap();
        assert_eq!(embedder.dimensions(), 1536);

        let embedder = OpenAIEmbedder::with_config("text-embedding-3-large", 3072).unwrap();
        assert_eq!(embedder.dimensions(), 3072);
    }

    #[test]
    fn test_from_settings() {
        let settings = EmbeddingSettings {
            model: "text-embedding-3-large".to_string(),
            dimensions: 256,
            batch_size: 0,
            ..EmbeddingSettings::default()
        };
        let embedder = OpenAIEmbedder::from_settings(&settings).unwrap();
        assert_eq!(embedder.model(), "text-embedding-3-large");
        assert_eq!(embedder.dimensions(), 256);
        assert_eq!(embedder.batch_size, 1);
    }
}
