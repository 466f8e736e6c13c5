//! Seed scenario: inserting a message authored by a human member causes the
//! Boundary Extraction listener to enqueue exactly one `boundary-extract`
//! job (and the Memo Accumulator listener exactly one `memo-batch-check`
//! job), and running the extraction job writes a conversation row and
//! appends `conversation:created`.

mod common;

use chrono::Utc;
use dispatch_core::domains::event_router::{BoundaryExtractionListener, MemoAccumulatorListener};
use dispatch_core::domains::events::MessageCreated;
use dispatch_core::kernel::event_log::EventLog;
use dispatch_core::kernel::{Listener, ProcessOutcome};
use serde_json::json;
use sqlx::Row;
use test_context::test_context;

use common::TestHarness;

#[test_context(TestHarness)]
#[tokio::test]
async fn enqueues_exactly_one_boundary_extract_job(ctx: &TestHarness) {
    let workspace_id = common::create_workspace(&ctx.db_pool, "acme").await.unwrap();
    let actor_id = common::create_actor(&ctx.db_pool, workspace_id, "ada").await.unwrap();
    let stream_id = common::create_stream(&ctx.db_pool, workspace_id, false).await.unwrap();
    let message_id = common::create_message(&ctx.db_pool, stream_id, actor_id, "what's our plan for launch?").await.unwrap();

    let mut conn = ctx.db_pool.acquire().await.unwrap();
    let event_id = EventLog::append(
        &mut conn,
        MessageCreated::EVENT_TYPE,
        &json!({
            "message_id": message_id,
            "stream_id": stream_id,
            "author_id": actor_id,
            "created_at": Utc::now(),
        }),
    )
    .await
    .unwrap();
    drop(conn);

    let events = EventLog::fetch_after(&ctx.db_pool, event_id - 1, 10, &[]).await.unwrap();
    assert_eq!(events.len(), 1);

    let boundary_listener = BoundaryExtractionListener::new();
    let boundary_outcome = boundary_listener.process_events(ctx.kernel.clone(), &events).await;
    assert!(matches!(boundary_outcome, ProcessOutcome::Processed { .. }));

    let memo_listener = MemoAccumulatorListener::new();
    let memo_outcome = memo_listener.process_events(ctx.kernel.clone(), &events).await;
    assert!(matches!(memo_outcome, ProcessOutcome::Processed { .. }));

    let rows = sqlx::query("SELECT queue FROM job_queue_messages WHERE queue = 'boundary-extract'")
        .fetch_all(&ctx.db_pool)
        .await
        .unwrap();
    assert_eq!(rows.len(), 1, "expected exactly one boundary-extract job");

    let memo_check_rows = sqlx::query("SELECT queue FROM job_queue_messages WHERE queue = 'memo-batch-check'")
        .fetch_all(&ctx.db_pool)
        .await
        .unwrap();
    assert_eq!(memo_check_rows.len(), 1, "expected exactly one memo-batch-check job too");

    // Now run the boundary-extract worker directly and confirm it writes a
    // conversation row and appends conversation:created.
    let payload: dispatch_core::domains::boundary_extraction::BoundaryExtractPayload =
        serde_json::from_value(sqlx::query("SELECT payload FROM job_queue_messages WHERE queue = 'boundary-extract'")
            .fetch_one(&ctx.db_pool)
            .await
            .unwrap()
            .get::<serde_json::Value, _>("payload"))
        .unwrap();

    // The model is asked to classify the message; respond with "new".
    ctx.ai_facade.push_object(json!({"action": "new"}));

    dispatch_core::domains::boundary_extraction::run(payload, ctx.kernel.clone()).await.unwrap();

    let conversations = sqlx::query("SELECT id FROM conversations WHERE trigger_message_id = $1")
        .bind(message_id)
        .fetch_all(&ctx.db_pool)
        .await
        .unwrap();
    assert_eq!(conversations.len(), 1);

    let created_events = sqlx::query("SELECT id FROM events WHERE event_type = 'conversation:created'")
        .fetch_all(&ctx.db_pool)
        .await
        .unwrap();
    assert_eq!(created_events.len(), 1);
}
