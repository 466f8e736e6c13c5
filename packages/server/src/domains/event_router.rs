//! Event listeners: four independent `Listener` impls, each with its own
//! cursor and debounce schedule, turning closed-taxonomy events into
//! job-queue enqueues. Kept in one file because they share small lookup
//! helpers (workspace-for-stream, author-is-human), not because they share
//! a cursor or a debounce window.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::error;

use crate::common::entity_ids::{
    ConversationId, MemoPendingItemId, MessageId, SessionId, StreamId, WorkspaceId,
};
use crate::kernel::cursor_lock::ProcessOutcome;
use crate::kernel::dispatcher::Listener;
use crate::kernel::event_log::Event;
use crate::kernel::jobs::EnqueueOptions;
use crate::kernel::ServerKernel;

use super::boundary_extraction::BoundaryExtractPayload;
use super::embedding::{EmbeddingPayload, EmbeddingTarget};
use super::events::{ConversationUpdated, MessageCreated};
use super::memo::MemoBatchCheckPayload;
use super::naming::{NamingMode, NamingPayload};

async fn workspace_for_stream(kernel: &ServerKernel, stream_id: StreamId) -> anyhow::Result<WorkspaceId> {
    let (workspace_id,): (uuid::Uuid,) = sqlx::query_as("SELECT workspace_id FROM streams WHERE id = $1")
        .bind(stream_id.into_uuid())
        .fetch_one(&kernel.db_pool)
        .await?;
    Ok(WorkspaceId::from_uuid(workspace_id))
}

/// `actors.kind` distinguishes human members from companion/system actors.
async fn author_is_human(kernel: &ServerKernel, author_id: uuid::Uuid) -> anyhow::Result<bool> {
    let (kind,): (String,) = sqlx::query_as("SELECT kind FROM actors WHERE id = $1")
        .bind(author_id)
        .fetch_one(&kernel.db_pool)
        .await?;
    Ok(kind == "human")
}

async fn process_each<F, Fut>(events: &[Event], handle: F) -> ProcessOutcome
where
    F: Fn(Event) -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<()>>,
{
    let mut processed_ids = Vec::new();
    for event in events {
        if let Err(err) = handle(event.clone()).await {
            error!(error = %err, event_id = event.id, "event listener failed");
            return ProcessOutcome::Error {
                processed_ids,
                message: err.to_string(),
            };
        }
        processed_ids.push(event.id);
    }
    match events.iter().map(|e| e.id).max() {
        Some(max_id) => ProcessOutcome::Processed { new_cursor: max_id },
        None => ProcessOutcome::NoEvents,
    }
}

/// Enqueues `boundary-extract` for messages authored by human members.
/// Companion/system messages never open or continue a conversation boundary
/// of their own — they're the thing conversations are about, not a party
/// to them.
pub struct BoundaryExtractionListener;

impl BoundaryExtractionListener {
    pub fn new() -> Self {
        Self
    }
}

impl Default for BoundaryExtractionListener {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Listener for BoundaryExtractionListener {
    fn id(&self) -> &str {
        "boundary-extraction"
    }

    fn interested_in(&self, event: &Event) -> bool {
        event.event_type == "message:created"
    }

    async fn process_events(&self, kernel: Arc<ServerKernel>, events: &[Event]) -> ProcessOutcome {
        process_each(events, |event| {
            let kernel = kernel.clone();
            async move {
                let payload: MessageCreated = serde_json::from_value(event.payload.clone())?;
                if !author_is_human(&kernel, payload.author_id).await? {
                    return Ok(());
                }

                let stream_id = StreamId::from_uuid(payload.stream_id);
                let workspace_id = workspace_for_stream(&kernel, stream_id).await?;
                let extract_payload = BoundaryExtractPayload {
                    workspace_id,
                    session_id: SessionId::new(),
                    message_id: MessageId::from_uuid(payload.message_id),
                    stream_id,
                };
                kernel
                    .job_queue
                    .enqueue("boundary-extract", serde_json::to_value(&extract_payload)?, EnqueueOptions::new())
                    .await?;
                Ok(())
            }
        })
        .await
    }
}

/// Enqueues `naming-generate` for messages that opened a conversation (i.e.
/// are some conversation's `trigger_message_id`). Mode follows the author:
/// a human-triggered conversation only gets a name if the title worker has
/// spare budget (`Optional`); a conversation triggered by a companion/system
/// message always needs one, since nothing else will ever prompt a human to
/// name it (`Required`).
pub struct NamingListener;

impl NamingListener {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NamingListener {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Listener for NamingListener {
    fn id(&self) -> &str {
        "naming"
    }

    fn interested_in(&self, event: &Event) -> bool {
        event.event_type == "message:created"
    }

    async fn process_events(&self, kernel: Arc<ServerKernel>, events: &[Event]) -> ProcessOutcome {
        process_each(events, |event| {
            let kernel = kernel.clone();
            async move {
                let payload: MessageCreated = serde_json::from_value(event.payload.clone())?;

                let conversation: Option<(uuid::Uuid,)> =
                    sqlx::query_as("SELECT id FROM conversations WHERE trigger_message_id = $1")
                        .bind(payload.message_id)
                        .fetch_optional(&kernel.db_pool)
                        .await?;
                let Some((conversation_id,)) = conversation else {
                    return Ok(());
                };

                let stream_id = StreamId::from_uuid(payload.stream_id);
                let workspace_id = workspace_for_stream(&kernel, stream_id).await?;
                let mode = if author_is_human(&kernel, payload.author_id).await? {
                    NamingMode::Optional
                } else {
                    NamingMode::Required
                };

                let naming_payload = NamingPayload {
                    workspace_id,
                    session_id: SessionId::new(),
                    conversation_id: ConversationId::from_uuid(conversation_id),
                    mode,
                };
                kernel
                    .job_queue
                    .enqueue("naming-generate", serde_json::to_value(&naming_payload)?, EnqueueOptions::new())
                    .await?;
                Ok(())
            }
        })
        .await
    }
}

/// Accumulates pending memo material and batch-triggers memo processing.
/// `message:created` is the primary accumulation path: every message's
/// content becomes a pending item for its stream. `conversation:updated`
/// carries no new content of its own (its trigger message was already
/// accumulated when it was created) but still re-checks the batch
/// threshold, so a conversation resolving flushes the memo promptly
/// instead of waiting on the next unrelated message to cross it.
pub struct MemoAccumulatorListener;

impl MemoAccumulatorListener {
    pub fn new() -> Self {
        Self
    }
}

impl Default for MemoAccumulatorListener {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Listener for MemoAccumulatorListener {
    fn id(&self) -> &str {
        "memo-accumulator"
    }

    fn interested_in(&self, event: &Event) -> bool {
        matches!(event.event_type.as_str(), "message:created" | "conversation:updated")
    }

    async fn process_events(&self, kernel: Arc<ServerKernel>, events: &[Event]) -> ProcessOutcome {
        process_each(events, |event| {
            let kernel = kernel.clone();
            async move {
                let stream_id = match event.event_type.as_str() {
                    "message:created" => {
                        let payload: MessageCreated = serde_json::from_value(event.payload.clone())?;
                        let stream_id = StreamId::from_uuid(payload.stream_id);

                        let (content,): (String,) = sqlx::query_as("SELECT content FROM messages WHERE id = $1")
                            .bind(payload.message_id)
                            .fetch_one(&kernel.db_pool)
                            .await?;
                        sqlx::query("INSERT INTO memo_pending_items (id, stream_id, content) VALUES ($1, $2, $3)")
                            .bind(MemoPendingItemId::new().into_uuid())
                            .bind(stream_id.into_uuid())
                            .bind(content)
                            .execute(&kernel.db_pool)
                            .await?;

                        stream_id
                    }
                    "conversation:updated" => {
                        let payload: ConversationUpdated = serde_json::from_value(event.payload.clone())?;
                        let (stream_id,): (uuid::Uuid,) =
                            sqlx::query_as("SELECT stream_id FROM conversations WHERE id = $1")
                                .bind(payload.conversation_id)
                                .fetch_one(&kernel.db_pool)
                                .await?;
                        StreamId::from_uuid(stream_id)
                    }
                    other => anyhow::bail!("memo accumulator is not interested in {other}"),
                };

                let workspace_id = workspace_for_stream(&kernel, stream_id).await?;
                let check_payload = MemoBatchCheckPayload {
                    workspace_id,
                    session_id: SessionId::new(),
                    stream_id,
                };
                kernel
                    .job_queue
                    .enqueue("memo-batch-check", serde_json::to_value(&check_payload)?, EnqueueOptions::new())
                    .await?;
                Ok(())
            }
        })
        .await
    }
}

/// Enqueues `embedding` jobs for newly created messages, the only listener
/// feeding the embedding worker its jobs.
pub struct EmbeddingListener;

impl EmbeddingListener {
    pub fn new() -> Self {
        Self
    }
}

impl Default for EmbeddingListener {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Listener for EmbeddingListener {
    fn id(&self) -> &str {
        "embedding"
    }

    fn interested_in(&self, event: &Event) -> bool {
        event.event_type == "message:created"
    }

    async fn process_events(&self, kernel: Arc<ServerKernel>, events: &[Event]) -> ProcessOutcome {
        process_each(events, |event| {
            let kernel = kernel.clone();
            async move {
                let payload: MessageCreated = serde_json::from_value(event.payload.clone())?;
                let stream_id = StreamId::from_uuid(payload.stream_id);
                let workspace_id = workspace_for_stream(&kernel, stream_id).await?;

                let (content,): (String,) = sqlx::query_as("SELECT content FROM messages WHERE id = $1")
                    .bind(payload.message_id)
                    .fetch_one(&kernel.db_pool)
                    .await?;

                let embedding_payload = EmbeddingPayload {
                    workspace_id,
                    session_id: SessionId::new(),
                    target: EmbeddingTarget::Message,
                    entity_id: payload.message_id,
                    text: content,
                };
                kernel
                    .job_queue
                    .enqueue("embedding", serde_json::to_value(&embedding_payload)?, EnqueueOptions::new())
                    .await?;
                Ok(())
            }
        })
        .await
    }
}
