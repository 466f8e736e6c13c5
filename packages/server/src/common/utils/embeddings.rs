use anyhow::{Context, Result};
use async_trait::async_trait;
use rig::embeddings::EmbeddingModel;
use rig::providers::openai;

use crate::kernel::BaseEmbeddingService;

/// Embedding service backed by rig-core's OpenAI provider (text-embedding-3-small).
pub struct EmbeddingService {
    model: openai::EmbeddingModel,
}

impl EmbeddingService {
    pub fn new(api_key: String) -> Self {
        let client = openai::Client::new(&api_key);
        let model = client.embedding_model(openai::TEXT_EMBEDDING_3_SMALL);
        Self { model }
    }
}

#[async_trait]
impl BaseEmbeddingService for EmbeddingService {
    async fn generate(&self, text: &str) -> Result<Vec<f32>> {
        let embedding = self
            .model
            .embed_text(text)
            .await
            .context("failed to call OpenAI embeddings API")?;

        Ok(embedding.vec.into_iter().map(|v| v as f32).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // Requires API key
    async fn test_generate_embedding() {
        let api_key = std::env::var("OPENAI_API_KEY").expect("OPENAI_API_KEY not set");
        let service = EmbeddingService::new(api_key);

        let embedding = service
            .generate("quarterly budget review meeting notes")
            .await
            .expect("embedding generation should succeed");

        assert_eq!(embedding.len(), 1536);
    }
}
