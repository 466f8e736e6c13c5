//! Companion response worker (`companion-response` queue): the AI-reply
//! action, restructured into the Three-Phase Runner and routed through the
//! Cost Interceptor instead of calling the AI façade directly.
//!
//! fetch: load the conversation, its messages, and the trigger message.
//! compute: run the Retrieval Loop for context, then `generateText` for
//! the reply, entirely without a held connection.
//! commit: insert the reply message and append a `message:created` event.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Postgres, Transaction};

use crate::common::entity_ids::{ActorId, ConversationId, MessageId, SessionId, StreamId, WorkspaceId};
use crate::domains::events::MessageCreated;
use crate::domains::retrieval::{RetrievalInput, TriggerMessage, run_retrieval_loop};
use crate::kernel::event_log::EventLog;
use crate::kernel::{ServerKernel, run_three_phase};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanionResponsePayload {
    pub workspace_id: WorkspaceId,
    pub session_id: SessionId,
    pub stream_id: StreamId,
    pub conversation_id: ConversationId,
    pub trigger_message_id: MessageId,
    pub companion_actor_id: ActorId,
}

#[derive(FromRow)]
struct MessageRow {
    id: uuid::Uuid,
    content: String,
}

struct Fetched {
    payload: CompanionResponsePayload,
    trigger_content: String,
    history: Vec<String>,
    dm_participant_ids: Option<Vec<ActorId>>,
}

struct Computed {
    payload: CompanionResponsePayload,
    reply_content: String,
}

pub async fn run(payload: CompanionResponsePayload, kernel: Arc<ServerKernel>) -> Result<()> {
    run_three_phase(
        &kernel.db_pool,
        |pool| fetch(pool, payload.clone()),
        |fetched| compute(kernel.clone(), fetched),
        |computed, tx| commit(computed, tx),
    )
    .await
}

async fn fetch(pool: &sqlx::PgPool, payload: CompanionResponsePayload) -> Result<Fetched> {
    let (trigger_content,): (String,) = sqlx::query_as("SELECT content FROM messages WHERE id = $1")
        .bind(payload.trigger_message_id.into_uuid())
        .fetch_one(pool)
        .await
        .context("failed to fetch trigger message")?;

    let rows: Vec<MessageRow> = sqlx::query_as(
        "SELECT m.id, m.content FROM messages m
         JOIN conversation_messages cm ON cm.message_id = m.id
         WHERE cm.conversation_id = $1 ORDER BY m.created_at ASC LIMIT 50",
    )
    .bind(payload.conversation_id.into_uuid())
    .fetch_all(pool)
    .await
    .context("failed to fetch conversation history")?;

    let is_dm: Option<(bool,)> = sqlx::query_as("SELECT is_direct_message FROM streams WHERE id = $1")
        .bind(payload.stream_id.into_uuid())
        .fetch_optional(pool)
        .await
        .context("failed to fetch stream")?;

    let dm_participant_ids = if is_dm.map(|(d,)| d).unwrap_or(false) {
        let rows: Vec<(uuid::Uuid,)> = sqlx::query_as("SELECT actor_id FROM stream_members WHERE stream_id = $1")
            .bind(payload.stream_id.into_uuid())
            .fetch_all(pool)
            .await
            .context("failed to fetch stream members")?;
        Some(rows.into_iter().map(|(id,)| ActorId::from_uuid(id)).collect())
    } else {
        None
    };

    Ok(Fetched {
        payload,
        trigger_content,
        history: rows.into_iter().map(|r| r.content).collect(),
        dm_participant_ids,
    })
}

async fn compute(kernel: Arc<ServerKernel>, fetched: Fetched) -> Result<Computed> {
    let retrieval_input = RetrievalInput {
        workspace_id: fetched.payload.workspace_id,
        session_id: fetched.payload.session_id,
        stream_id: fetched.payload.stream_id,
        trigger_message: TriggerMessage {
            id: fetched.payload.trigger_message_id,
            text: fetched.trigger_content.clone(),
        },
        conversation_history: fetched.history.clone(),
        actor_id: fetched.payload.companion_actor_id,
        dm_participant_ids: fetched.dm_participant_ids,
    };

    let retrieval = run_retrieval_loop(&kernel.db_pool, &kernel.ai, &Default::default(), &retrieval_input)
        .await
        .context("retrieval loop failed")?;

    let system = "You are a helpful team-chat companion. Use the retrieved context to ground your reply; \
                  do not invent facts the context does not support.";
    let prompt = format!(
        "Retrieved context:\n{}\n\nConversation so far:\n{}\n\nReply to: {}",
        retrieval.retrieved_context,
        fetched.history.join("\n"),
        fetched.trigger_content
    );

    let reply_content = kernel
        .ai
        .generate_text(fetched.payload.workspace_id, fetched.payload.session_id, system, &prompt, "claude-3-5-sonnet-latest")
        .await
        .context("companion reply generation failed")?;

    Ok(Computed { payload: fetched.payload, reply_content })
}

async fn commit(computed: Computed, tx: &mut Transaction<'_, Postgres>) -> Result<()> {
    let message_id = MessageId::new();

    sqlx::query(
        "INSERT INTO messages (id, stream_id, author_id, content, created_at, updated_at) VALUES ($1, $2, $3, $4, now(), now())",
    )
    .bind(message_id.into_uuid())
    .bind(computed.payload.stream_id.into_uuid())
    .bind(computed.payload.companion_actor_id.into_uuid())
    .bind(&computed.reply_content)
    .execute(&mut **tx)
    .await
    .context("failed to insert companion reply message")?;

    sqlx::query("INSERT INTO conversation_messages (conversation_id, message_id) VALUES ($1, $2)")
        .bind(computed.payload.conversation_id.into_uuid())
        .bind(message_id.into_uuid())
        .execute(&mut **tx)
        .await
        .context("failed to link reply message to conversation")?;

    EventLog::append(
        &mut **tx,
        MessageCreated::EVENT_TYPE,
        &serde_json::to_value(MessageCreated {
            message_id: message_id.into_uuid(),
            stream_id: computed.payload.stream_id.into_uuid(),
            author_id: computed.payload.companion_actor_id.into_uuid(),
            created_at: chrono::Utc::now(),
        })?,
    )
    .await?;

    Ok(())
}
