//! Seed scenario: when the budget enforcer reports a hard limit for a
//! workspace, `InterceptedAi` returns an error carrying that reason and
//! makes no provider call (the mock facade has no queued response, so any
//! call through to it would itself error, but we also assert no cost record
//! was written — the one side effect a real call would leave behind).

mod common;

use dispatch_core::common::entity_ids::{SessionId, WorkspaceId};
use serde_json::json;
use test_context::test_context;

use common::TestHarness;

#[test_context(TestHarness)]
#[tokio::test]
async fn hard_limit_blocks_call_and_writes_no_cost_record(ctx: &TestHarness) {
    let workspace_id = common::create_workspace(&ctx.db_pool, "acme").await.unwrap();
    common::set_workspace_budget(&ctx.db_pool, workspace_id, 10.0, 100.0).await.unwrap();
    common::record_cost(&ctx.db_pool, workspace_id, uuid::Uuid::now_v7(), 15.0).await.unwrap();

    let session_id = SessionId::new();
    let schema = json!({"type": "object", "properties": {"x": {"type": "string"}}});

    let result = ctx
        .kernel
        .ai
        .generate_object(
            WorkspaceId::from_uuid(workspace_id),
            session_id,
            "system",
            "prompt",
            &schema,
            "claude-3-5-sonnet-latest",
        )
        .await;

    assert!(result.is_err(), "expected hard budget limit to block the call");
    let message = result.unwrap_err().to_string();
    assert!(message.contains("budget exceeded"), "error should carry budget context: {message}");

    let cost_rows: Vec<(uuid::Uuid,)> = sqlx::query_as("SELECT id FROM cost_records WHERE workspace_id = $1 AND session_id = $2")
        .bind(workspace_id)
        .bind(session_id.into_uuid())
        .fetch_all(&ctx.db_pool)
        .await
        .unwrap();
    assert!(cost_rows.is_empty(), "blocked call must not write a cost record");
}
