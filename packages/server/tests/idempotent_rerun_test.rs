//! Seed scenario: enqueuing the same `message_id` twice, even concurrently,
//! yields exactly one job row and both calls resolve to the same job id.

mod common;

use dispatch_core::kernel::jobs::{EnqueueOptions, JobQueue, PostgresJobQueue};
use serde_json::json;
use test_context::test_context;

use common::TestHarness;

#[test_context(TestHarness)]
#[tokio::test]
async fn concurrent_enqueue_with_same_message_id_dedupes_to_one_row(ctx: &TestHarness) {
    let queue = PostgresJobQueue::new(ctx.db_pool.clone());
    let payload = json!({"stream_id": uuid::Uuid::now_v7()});

    let options_a = EnqueueOptions {
        message_id: Some("queue_rerun_X".to_string()),
        ..EnqueueOptions::new()
    };
    let options_b = EnqueueOptions {
        message_id: Some("queue_rerun_X".to_string()),
        ..EnqueueOptions::new()
    };

    let (result_a, result_b) = tokio::join!(
        queue.enqueue("companion-response", payload.clone(), options_a),
        queue.enqueue("companion-response", payload.clone(), options_b),
    );

    let id_a = result_a.unwrap().job_id();
    let id_b = result_b.unwrap().job_id();
    assert_eq!(id_a, id_b, "both enqueue calls must resolve to the same job id");

    let rows = sqlx::query("SELECT id FROM job_queue_messages WHERE message_id = 'queue_rerun_X'")
        .fetch_all(&ctx.db_pool)
        .await
        .unwrap();
    assert_eq!(rows.len(), 1, "exactly one row should exist for the deduped message_id");
}
