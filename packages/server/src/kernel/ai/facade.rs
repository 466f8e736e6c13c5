//! AI façade: a single entry point for text generation, structured output,
//! and embeddings, with cost interception and budget enforcement wrapped
//! around every call.
//!
//! Generation itself wraps the same `rig-core` provider clients the rest of
//! the stack uses (`rig::providers::anthropic` for text, `rig::providers::openai`
//! for embeddings). Interception happens at the façade method, not via an
//! HTTP transport layer — rig's agent builder has no pluggable transport, so
//! this crate wraps the call site instead.

use anyhow::{Context, Result};
use async_trait::async_trait;
use rig::completion::Prompt;
use rig::embeddings::EmbeddingModel;
use rig::providers::{anthropic, openai};
use serde_json::Value;

use super::repair::repair_and_parse;

/// Token usage for a single model call, as reported (or estimated) by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModelUsage {
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
}

impl ModelUsage {
    /// rig's high-level `Prompt` trait does not surface token counts, so this
    /// estimates usage from character length (~4 chars/token) when the
    /// underlying provider response doesn't carry real counts. `pub(crate)`
    /// so the embed path in `kernel::ai` can synthesize usage for calls that
    /// have no completion text at all.
    pub(crate) fn estimate(prompt: &str, completion: &str) -> Self {
        let prompt_tokens = (prompt.len() as i64 / 4).max(1);
        let completion_tokens = (completion.len() as i64 / 4).max(1);
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// Generic AI capability surface used by every structured-output worker.
#[async_trait]
pub trait AiFacade: Send + Sync {
    /// Free-text generation, returning the response text and its token usage.
    async fn generate_text(
        &self,
        system: &str,
        prompt: &str,
        model: Option<&str>,
    ) -> Result<(String, ModelUsage)>;

    /// Structured generation against a JSON schema. Returns parsed JSON and
    /// usage; applies the repair pass once before giving up.
    async fn generate_object(
        &self,
        system: &str,
        prompt: &str,
        schema: &Value,
        model: Option<&str>,
    ) -> Result<(Value, ModelUsage)>;

    /// Embed a single piece of text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of texts (sequential; rig's embedding model trait
    /// provides single-text embedding).
    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Concrete façade wrapping Anthropic (text) and OpenAI (embeddings).
pub struct RigAiFacade {
    text_client: anthropic::Client,
    embedding_model: openai::EmbeddingModel,
    default_model: String,
}

impl RigAiFacade {
    pub fn new(anthropic_api_key: String, openai_api_key: String, default_model: impl Into<String>) -> Self {
        let text_client = anthropic::ClientBuilder::new(&anthropic_api_key).build();
        let embedding_client = openai::Client::new(&openai_api_key);
        let embedding_model = embedding_client.embedding_model(openai::TEXT_EMBEDDING_3_SMALL);
        Self {
            text_client,
            embedding_model,
            default_model: default_model.into(),
        }
    }

    fn model_name<'a>(&'a self, requested: Option<&'a str>) -> &'a str {
        requested.unwrap_or(&self.default_model)
    }
}

#[async_trait]
impl AiFacade for RigAiFacade {
    async fn generate_text(
        &self,
        system: &str,
        prompt: &str,
        model: Option<&str>,
    ) -> Result<(String, ModelUsage)> {
        let model_name = self.model_name(model);
        let agent = self
            .text_client
            .agent(model_name)
            .preamble(system)
            .max_tokens(4096)
            .build();

        let response = agent
            .prompt(prompt)
            .await
            .context("anthropic completion failed")?;

        let usage = ModelUsage::estimate(prompt, &response);
        Ok((response, usage))
    }

    async fn generate_object(
        &self,
        system: &str,
        prompt: &str,
        schema: &Value,
        model: Option<&str>,
    ) -> Result<(Value, ModelUsage)> {
        let schema_instruction = format!(
            "Respond with JSON only, matching this schema exactly, no markdown fences:\n{}",
            serde_json::to_string_pretty(schema).unwrap_or_default()
        );
        let combined_system = format!("{system}\n\n{schema_instruction}");

        let (raw, usage) = self.generate_text(&combined_system, prompt, model).await?;

        let parsed = repair_and_parse(&raw)
            .with_context(|| format!("structured output did not parse as JSON: {raw}"))?;

        Ok((parsed, usage))
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let embedding = self
            .embedding_model
            .embed_text(text)
            .await
            .context("openai embedding call failed")?;

        Ok(embedding.vec.into_iter().map(|v| v as f32).collect())
    }

    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_estimate_is_never_zero() {
        let usage = ModelUsage::estimate("", "");
        assert_eq!(usage.prompt_tokens, 1);
        assert_eq!(usage.completion_tokens, 1);
    }

    #[test]
    fn usage_estimate_scales_with_length() {
        let short = ModelUsage::estimate("hi", "ok");
        let long = ModelUsage::estimate(&"a".repeat(400), &"b".repeat(400));
        assert!(long.total_tokens > short.total_tokens);
    }
}
