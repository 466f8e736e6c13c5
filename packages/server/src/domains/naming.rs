//! Naming worker (`naming-generate` queue): generates a short display name
//! for a conversation.
//!
//! Two modes: `optional` lets the model reply `NOT_ENOUGH_CONTEXT`, which
//! is accepted and leaves the conversation unnamed; `required` (used for
//! non-human trigger authors, who won't later rename it themselves) turns
//! the same response into a hard error instead.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{FromRow, Postgres, Transaction};

use crate::common::entity_ids::{ConversationId, SessionId, WorkspaceId};
use crate::kernel::{ServerKernel, run_three_phase};

const NOT_ENOUGH_CONTEXT: &str = "NOT_ENOUGH_CONTEXT";
const MAX_NAME_LEN: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamingMode {
    Optional,
    Required,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamingPayload {
    pub workspace_id: WorkspaceId,
    pub session_id: SessionId,
    pub conversation_id: ConversationId,
    pub mode: NamingMode,
}

#[derive(FromRow)]
struct ConversationMessage {
    content: String,
}

struct Fetched {
    payload: NamingPayload,
    messages: Vec<ConversationMessage>,
}

struct Computed {
    payload: NamingPayload,
    name: Option<String>,
}

pub async fn run(payload: NamingPayload, kernel: Arc<ServerKernel>) -> Result<()> {
    run_three_phase(
        &kernel.db_pool,
        |pool| fetch(pool, payload.clone()),
        |fetched| compute(kernel.clone(), fetched),
        |computed, tx| commit(computed, tx),
    )
    .await
}

async fn fetch(pool: &sqlx::PgPool, payload: NamingPayload) -> Result<Fetched> {
    let messages: Vec<ConversationMessage> = sqlx::query_as(
        "SELECT m.content FROM messages m
         JOIN conversation_messages cm ON cm.message_id = m.id
         WHERE cm.conversation_id = $1 ORDER BY m.created_at ASC LIMIT 50",
    )
    .bind(payload.conversation_id.into_uuid())
    .fetch_all(pool)
    .await
    .context("failed to fetch conversation messages for naming")?;

    Ok(Fetched { payload, messages })
}

async fn compute(kernel: Arc<ServerKernel>, fetched: Fetched) -> Result<Computed> {
    let schema = json!({
        "type": "object",
        "properties": {"name": {"type": "string"}},
        "required": ["name"]
    });

    let transcript = fetched
        .messages
        .iter()
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    let system = format!(
        "Generate a short display name (under {MAX_NAME_LEN} characters) for this conversation. \
         If there isn't enough context to name it meaningfully, reply with exactly \"{NOT_ENOUGH_CONTEXT}\"."
    );
    let prompt = format!("Conversation transcript:\n{transcript}");

    let raw = kernel
        .ai
        .generate_object(fetched.payload.workspace_id, fetched.payload.session_id, &system, &prompt, &schema, "claude-3-5-haiku-latest")
        .await
        .context("naming model call failed")?;

    let raw_name = raw
        .get("name")
        .and_then(|v| v.as_str())
        .context("naming response missing name field")?
        .trim()
        .to_string();

    if raw_name == NOT_ENOUGH_CONTEXT {
        if fetched.payload.mode == NamingMode::Required {
            bail!("naming is required for this conversation but the model had insufficient context");
        }
        return Ok(Computed { payload: fetched.payload, name: None });
    }

    let trimmed = raw_name.trim_matches(|c| c == '"' || c == '\'');
    let name = if trimmed.chars().count() > MAX_NAME_LEN {
        trimmed.chars().take(MAX_NAME_LEN).collect()
    } else {
        trimmed.to_string()
    };

    Ok(Computed { payload: fetched.payload, name: Some(name) })
}

async fn commit(computed: Computed, tx: &mut Transaction<'_, Postgres>) -> Result<()> {
    let Some(name) = computed.name else {
        return Ok(());
    };

    sqlx::query("UPDATE conversations SET name = $2, updated_at = now() WHERE id = $1")
        .bind(computed.payload.conversation_id.into_uuid())
        .bind(name)
        .execute(&mut **tx)
        .await
        .context("failed to persist conversation name")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_quotes_and_truncates_long_names() {
        let long_name = format!("\"{}\"", "x".repeat(150));
        let trimmed = long_name.trim_matches(|c| c == '"' || c == '\'');
        let name: String = if trimmed.chars().count() > MAX_NAME_LEN {
            trimmed.chars().take(MAX_NAME_LEN).collect()
        } else {
            trimmed.to_string()
        };
        assert_eq!(name.chars().count(), MAX_NAME_LEN);
    }
}
