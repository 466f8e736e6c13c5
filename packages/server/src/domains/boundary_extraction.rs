//! Boundary Extraction worker (`boundary-extract` queue): decides whether a
//! new message starts a new conversation, continues an existing one, or
//! completes one, and may suggest "completeness updates" touching other
//! conversations the model noticed were resolved by this message.
//!
//! The commit phase enforces a security rule the model cannot override:
//! any suggested update whose target conversation is not in the
//! `valid_update_targets` set the fetch phase actually looked at is
//! dropped rather than applied, since the model is only ever shown a
//! bounded context window and must not be trusted to name conversations it
//! was never given.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{FromRow, Postgres, Transaction};
use tracing::warn;

use crate::common::entity_ids::{ConversationId, MessageId, SessionId, StreamId, WorkspaceId};
use crate::kernel::event_log::EventLog;
use crate::kernel::{ServerKernel, run_three_phase};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundaryExtractPayload {
    pub workspace_id: WorkspaceId,
    pub session_id: SessionId,
    pub message_id: MessageId,
    pub stream_id: StreamId,
}

#[derive(Debug, Clone, FromRow)]
struct RecentMessage {
    id: uuid::Uuid,
    content: String,
}

struct FetchedContext {
    payload: BoundaryExtractPayload,
    trigger_content: String,
    recent_messages: Vec<RecentMessage>,
    open_conversations: Vec<ConversationId>,
}

#[derive(Debug, Deserialize)]
struct BoundaryDecision {
    action: String, // "new", "continue", "complete"
    conversation_id: Option<ConversationId>,
    #[serde(default)]
    completeness_updates: Vec<CompletenessUpdate>,
}

#[derive(Debug, Deserialize)]
struct CompletenessUpdate {
    conversation_id: ConversationId,
    resolved: bool,
}

struct Computed {
    payload: BoundaryExtractPayload,
    decision: BoundaryDecision,
    valid_update_targets: Vec<ConversationId>,
}

pub async fn run(payload: BoundaryExtractPayload, kernel: Arc<ServerKernel>) -> Result<()> {
    run_three_phase(
        &kernel.db_pool,
        |pool| fetch(pool, payload.clone()),
        |fetched| compute(kernel.clone(), fetched),
        |computed, tx| commit(computed, tx),
    )
    .await
}

async fn fetch(pool: &sqlx::PgPool, payload: BoundaryExtractPayload) -> Result<FetchedContext> {
    let (content,): (String,) = sqlx::query_as("SELECT content FROM messages WHERE id = $1")
        .bind(payload.message_id.into_uuid())
        .fetch_one(pool)
        .await
        .context("failed to fetch trigger message")?;

    let recent_messages: Vec<RecentMessage> = sqlx::query_as(
        "SELECT id, content FROM messages WHERE stream_id = $1 AND id != $2 ORDER BY created_at DESC LIMIT 20",
    )
    .bind(payload.stream_id.into_uuid())
    .bind(payload.message_id.into_uuid())
    .fetch_all(pool)
    .await
    .context("failed to fetch recent messages")?;

    let open_rows: Vec<(uuid::Uuid,)> = sqlx::query_as(
        "SELECT id FROM conversations WHERE stream_id = $1 AND resolved_at IS NULL ORDER BY updated_at DESC LIMIT 10",
    )
    .bind(payload.stream_id.into_uuid())
    .fetch_all(pool)
    .await
    .context("failed to fetch open conversations")?;

    let open_conversations = open_rows.into_iter().map(|(id,)| ConversationId::from_uuid(id)).collect();

    Ok(FetchedContext {
        payload,
        trigger_content: content,
        recent_messages,
        open_conversations,
    })
}

async fn compute(kernel: Arc<ServerKernel>, fetched: FetchedContext) -> Result<Computed> {
    let schema = json!({
        "type": "object",
        "properties": {
            "action": {"type": "string", "enum": ["new", "continue", "complete"]},
            "conversation_id": {"type": ["string", "null"]},
            "completeness_updates": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "conversation_id": {"type": "string"},
                        "resolved": {"type": "boolean"}
                    },
                    "required": ["conversation_id", "resolved"]
                }
            }
        },
        "required": ["action"]
    });

    let history = fetched
        .recent_messages
        .iter()
        .map(|m| format!("- {}", m.content))
        .collect::<Vec<_>>()
        .join("\n");
    let open = fetched
        .open_conversations
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    let system = "Decide whether this message starts, continues, or completes a conversation boundary.";
    let prompt = format!(
        "Trigger message: {}\nRecent messages:\n{}\nOpen conversations: {}",
        fetched.trigger_content, history, open
    );

    let raw = kernel
        .ai
        .generate_object(fetched.payload.workspace_id, fetched.payload.session_id, system, &prompt, &schema, "claude-3-5-haiku-latest")
        .await
        .context("boundary extraction model call failed")?;

    let decision: BoundaryDecision = match serde_json::from_value(raw.clone()) {
        Ok(decision) => decision,
        Err(err) => {
            warn!(error = %err, "boundary extraction response failed schema parse, attempting repair");
            let repaired = crate::kernel::ai::repair::repair_and_parse(&raw.to_string())
                .context("boundary extraction response unreadable after repair")?;
            serde_json::from_value(repaired).context("repaired boundary extraction response still unreadable")?
        }
    };

    Ok(Computed {
        payload: fetched.payload,
        decision,
        valid_update_targets: fetched.open_conversations,
    })
}

async fn commit(computed: Computed, tx: &mut Transaction<'_, Postgres>) -> Result<()> {
    let Computed { payload, decision, valid_update_targets } = computed;

    let conversation_id = match decision.action.as_str() {
        "new" => {
            let id = ConversationId::new();
            sqlx::query(
                "INSERT INTO conversations (id, stream_id, trigger_message_id, created_at, updated_at) VALUES ($1, $2, $3, now(), now())",
            )
            .bind(id.into_uuid())
            .bind(payload.stream_id.into_uuid())
            .bind(payload.message_id.into_uuid())
            .execute(&mut **tx)
            .await
            .context("failed to insert conversation")?;

            EventLog::append(
                &mut **tx,
                crate::domains::events::ConversationCreated::EVENT_TYPE,
                &json!({"conversation_id": id, "stream_id": payload.stream_id, "trigger_message_id": payload.message_id}),
            )
            .await?;
            id
        }
        "continue" | "complete" => {
            let id = decision
                .conversation_id
                .context("continue/complete decision missing conversation_id")?;
            if !valid_update_targets.contains(&id) {
                bail!("boundary extraction targeted a conversation outside the valid update set");
            }
            let resolved_clause = decision.action == "complete";
            sqlx::query("UPDATE conversations SET updated_at = now(), resolved_at = CASE WHEN $2 THEN now() ELSE resolved_at END WHERE id = $1")
                .bind(id.into_uuid())
                .bind(resolved_clause)
                .execute(&mut **tx)
                .await
                .context("failed to update conversation")?;

            EventLog::append(
                &mut **tx,
                crate::domains::events::ConversationUpdated::EVENT_TYPE,
                &json!({"conversation_id": id, "trigger_message_id": payload.message_id}),
            )
            .await?;
            id
        }
        other => bail!("unknown boundary extraction action: {other}"),
    };

    for update in decision.completeness_updates {
        if !valid_update_targets.contains(&update.conversation_id) {
            warn!(conversation_id = %update.conversation_id, "dropping completeness update outside valid targets");
            continue;
        }
        sqlx::query("UPDATE conversations SET resolved_at = CASE WHEN $2 THEN now() ELSE NULL END, updated_at = now() WHERE id = $1")
            .bind(update.conversation_id.into_uuid())
            .bind(update.resolved)
            .execute(&mut **tx)
            .await
            .context("failed to apply completeness update")?;
    }

    let _ = conversation_id;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_parses_continue_action() {
        let raw = json!({"action": "continue", "conversation_id": ConversationId::nil().to_string()});
        let decision: BoundaryDecision = serde_json::from_value(raw).unwrap();
        assert_eq!(decision.action, "continue");
        assert!(decision.conversation_id.is_some());
    }
}
