//! Embedding worker (`embedding` queue): embeds a single entity's text and
//! writes the vector back. A generic `EmbeddingTarget` covers every
//! embeddable table rather than one worker per entity type, since the
//! write is always the same `UPDATE ... SET embedding = $2 WHERE id = $1`
//! shape (`common::embedding::Embeddable::update_embedding`).

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::common::entity_ids::{SessionId, WorkspaceId};
use crate::kernel::ServerKernel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingTarget {
    Message,
    Memo,
    Attachment,
}

impl EmbeddingTarget {
    fn table_name(&self) -> &'static str {
        match self {
            EmbeddingTarget::Message => "messages",
            EmbeddingTarget::Memo => "memos",
            EmbeddingTarget::Attachment => "attachments",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingPayload {
    pub workspace_id: WorkspaceId,
    pub session_id: SessionId,
    pub target: EmbeddingTarget,
    pub entity_id: Uuid,
    pub text: String,
}

/// Not a Three-Phase Runner instance: there is no domain mutation beyond
/// the embedding column itself, so fetch/compute/commit would collapse to
/// a single statement wrapping a single statement. `embed` still goes
/// through the Cost Interceptor via `kernel.ai`.
pub async fn run(payload: EmbeddingPayload, kernel: Arc<ServerKernel>) -> Result<()> {
    if payload.text.trim().is_empty() {
        bail!("refusing to embed empty text for {:?} {}", payload.target, payload.entity_id);
    }

    let embedding = kernel
        .ai
        .embed(payload.workspace_id, payload.session_id, &payload.text)
        .await
        .context("embedding call failed")?;
    let vector = pgvector::Vector::from(embedding);

    let query = format!("UPDATE {} SET embedding = $2 WHERE id = $1", payload.target.table_name());
    sqlx::query(&query)
        .bind(payload.entity_id)
        .bind(vector)
        .execute(&kernel.db_pool)
        .await
        .context("failed to persist embedding")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_maps_to_expected_table() {
        assert_eq!(EmbeddingTarget::Message.table_name(), "messages");
        assert_eq!(EmbeddingTarget::Memo.table_name(), "memos");
        assert_eq!(EmbeddingTarget::Attachment.table_name(), "attachments");
    }
}
