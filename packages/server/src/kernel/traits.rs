// Trait definitions for dependency injection
//
// These are INFRASTRUCTURE traits only - no business logic.
// Business logic (job handlers, retrieval, memo accumulation) lives in domains.
//
// Naming convention: Base* for trait names (e.g., BaseEmbeddingService)

use anyhow::Result;
use async_trait::async_trait;

// =============================================================================
// Embedding Service Trait (Infrastructure)
// =============================================================================

#[async_trait]
pub trait BaseEmbeddingService: Send + Sync {
    /// Generate an embedding for text (returns a 1536-dimensional vector).
    async fn generate(&self, text: &str) -> Result<Vec<f32>>;
}
