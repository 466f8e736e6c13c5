//! Memo Accumulator: `memo-batch-check` decides whether a stream's queued
//! memo updates have reached a batching threshold and, if so, enqueues
//! `memo-batch-process`; the latter folds the pending items into the
//! stream's memo in one model call and clears them.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{FromRow, Postgres, Transaction};
use uuid::Uuid;

use crate::common::entity_ids::{MemoId, MemoPendingItemId, SessionId, StreamId, WorkspaceId};
use crate::kernel::jobs::{EnqueueOptions, JobQueue};
use crate::kernel::{ServerKernel, run_three_phase};

const BATCH_THRESHOLD: i64 = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoBatchCheckPayload {
    pub workspace_id: WorkspaceId,
    pub session_id: SessionId,
    pub stream_id: StreamId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoBatchProcessPayload {
    pub workspace_id: WorkspaceId,
    pub session_id: SessionId,
    pub stream_id: StreamId,
}

pub async fn run_check(payload: MemoBatchCheckPayload, kernel: Arc<ServerKernel>) -> Result<()> {
    let (pending_count,): (i64,) = sqlx::query_as(
        "SELECT count(*) FROM memo_pending_items WHERE stream_id = $1",
    )
    .bind(payload.stream_id.into_uuid())
    .fetch_one(&kernel.db_pool)
    .await
    .context("failed to count memo pending items")?;

    if pending_count < BATCH_THRESHOLD {
        return Ok(());
    }

    let process_payload = MemoBatchProcessPayload {
        workspace_id: payload.workspace_id,
        session_id: payload.session_id,
        stream_id: payload.stream_id,
    };

    let options = EnqueueOptions {
        singleton_key: Some(format!("memo-batch-process:{}", payload.stream_id)),
        singleton_window_seconds: Some(60),
        ..EnqueueOptions::new()
    };

    kernel
        .job_queue
        .enqueue("memo-batch-process", serde_json::to_value(&process_payload)?, options)
        .await
        .context("failed to enqueue memo-batch-process")?;

    Ok(())
}

#[derive(FromRow)]
struct PendingItemRow {
    id: Uuid,
    content: String,
}

#[derive(FromRow)]
struct ExistingMemo {
    id: Uuid,
    content: String,
}

struct Fetched {
    payload: MemoBatchProcessPayload,
    pending: Vec<PendingItemRow>,
    existing_memo: Option<ExistingMemo>,
}

struct Computed {
    payload: MemoBatchProcessPayload,
    memo_id: Option<MemoId>,
    content: String,
    processed_item_ids: Vec<MemoPendingItemId>,
}

pub async fn run_process(payload: MemoBatchProcessPayload, kernel: Arc<ServerKernel>) -> Result<()> {
    run_three_phase(
        &kernel.db_pool,
        |pool| fetch(pool, payload.clone()),
        |fetched| compute(kernel.clone(), fetched),
        |computed, tx| commit(computed, tx),
    )
    .await
}

async fn fetch(pool: &sqlx::PgPool, payload: MemoBatchProcessPayload) -> Result<Fetched> {
    let pending: Vec<PendingItemRow> = sqlx::query_as(
        "SELECT id, content FROM memo_pending_items WHERE stream_id = $1 ORDER BY created_at ASC",
    )
    .bind(payload.stream_id.into_uuid())
    .fetch_all(pool)
    .await
    .context("failed to fetch memo pending items")?;

    let existing_memo: Option<ExistingMemo> = sqlx::query_as(
        "SELECT id, content FROM memos WHERE stream_id = $1",
    )
    .bind(payload.stream_id.into_uuid())
    .fetch_optional(pool)
    .await
    .context("failed to fetch existing memo")?;

    Ok(Fetched { payload, pending, existing_memo })
}

async fn compute(kernel: Arc<ServerKernel>, fetched: Fetched) -> Result<Computed> {
    if fetched.pending.is_empty() {
        return Ok(Computed {
            memo_id: fetched.existing_memo.as_ref().map(|m| MemoId::from_uuid(m.id)),
            content: fetched.existing_memo.map(|m| m.content).unwrap_or_default(),
            processed_item_ids: Vec::new(),
            payload: fetched.payload,
        });
    }

    let schema = json!({
        "type": "object",
        "properties": {"content": {"type": "string"}},
        "required": ["content"]
    });
    let system = "Merge the pending updates into the existing memo, keeping it concise and removing superseded facts.";
    let existing = fetched.existing_memo.as_ref().map(|m| m.content.as_str()).unwrap_or("(none yet)");
    let updates = fetched.pending.iter().map(|p| format!("- {}", p.content)).collect::<Vec<_>>().join("\n");
    let prompt = format!("Existing memo:\n{existing}\n\nPending updates:\n{updates}");

    let raw = kernel
        .ai
        .generate_object(fetched.payload.workspace_id, fetched.payload.session_id, system, &prompt, &schema, "claude-3-5-sonnet-latest")
        .await
        .context("memo accumulation model call failed")?;

    let content = raw
        .get("content")
        .and_then(|v| v.as_str())
        .context("memo accumulation response missing content field")?
        .to_string();

    Ok(Computed {
        payload: fetched.payload,
        memo_id: fetched.existing_memo.map(|m| MemoId::from_uuid(m.id)),
        content,
        processed_item_ids: fetched.pending.into_iter().map(|p| MemoPendingItemId::from_uuid(p.id)).collect(),
    })
}

async fn commit(computed: Computed, tx: &mut Transaction<'_, Postgres>) -> Result<()> {
    match computed.memo_id {
        Some(id) => {
            sqlx::query("UPDATE memos SET content = $2, updated_at = now() WHERE id = $1")
                .bind(id.into_uuid())
                .bind(&computed.content)
                .execute(&mut **tx)
                .await
                .context("failed to update memo")?;
        }
        None => {
            let id = MemoId::new();
            sqlx::query(
                "INSERT INTO memos (id, stream_id, content, created_at, updated_at) VALUES ($1, $2, $3, now(), now())",
            )
            .bind(id.into_uuid())
            .bind(computed.payload.stream_id.into_uuid())
            .bind(&computed.content)
            .execute(&mut **tx)
            .await
            .context("failed to insert memo")?;
        }
    }

    if !computed.processed_item_ids.is_empty() {
        let ids: Vec<Uuid> = computed.processed_item_ids.iter().map(|id| id.into_uuid()).collect();
        sqlx::query("DELETE FROM memo_pending_items WHERE id = ANY($1)")
            .bind(ids)
            .execute(&mut **tx)
            .await
            .context("failed to clear processed memo pending items")?;
    }

    Ok(())
}
