//! Seed scenario: when the retrieval loop's planning call fails, it falls
//! back to deterministic baseline queries derived from the trigger message
//! and keeps going rather than propagating the error.

mod common;

use dispatch_core::common::entity_ids::{ActorId, MessageId, SessionId, StreamId, WorkspaceId};
use dispatch_core::config::RetrievalConfig;
use dispatch_core::domains::retrieval::{derive_baseline_queries, run_retrieval_loop, QueryTarget, QueryType, RetrievalInput, TriggerMessage};
use test_context::test_context;

use common::TestHarness;

#[test_context(TestHarness)]
#[tokio::test]
async fn planning_failure_falls_back_to_baseline_queries(ctx: &TestHarness) {
    let workspace_id = common::create_workspace(&ctx.db_pool, "acme").await.unwrap();
    let actor_id = common::create_actor(&ctx.db_pool, workspace_id, "ada").await.unwrap();
    let stream_id = common::create_stream(&ctx.db_pool, workspace_id, false).await.unwrap();
    let trigger_text = "did we finalize the \"Q3-roadmap\" doc?";
    let trigger_id = common::create_message(&ctx.db_pool, stream_id, actor_id, trigger_text).await.unwrap();
    common::create_message(&ctx.db_pool, stream_id, actor_id, "yes the Q3-roadmap doc is final").await.unwrap();

    let input = RetrievalInput {
        workspace_id: WorkspaceId::from_uuid(workspace_id),
        session_id: SessionId::new(),
        stream_id: StreamId::from_uuid(stream_id),
        trigger_message: TriggerMessage { id: MessageId::from_uuid(trigger_id), text: trigger_text.to_string() },
        conversation_history: Vec::new(),
        actor_id: ActorId::from_uuid(actor_id),
        dm_participant_ids: None,
    };

    // Decide always calls the model first, and the evaluation step that
    // follows each round also calls it. Leave the mock queue empty so both
    // calls fail: Decide must fall back to the deterministic baseline
    // queries, and Evaluate must fall back to finalizing (or retrying with
    // baseline again) rather than propagating either failure.

    let result = run_retrieval_loop(&ctx.db_pool, &ctx.kernel.ai, &RetrievalConfig::default(), &input)
        .await
        .expect("retrieval loop must not propagate a planning-call failure");

    let expected_baseline = derive_baseline_queries(trigger_text);
    assert!(!expected_baseline.is_empty());

    let baseline_reruns = result
        .searches_performed
        .iter()
        .filter(|q| q.text == trigger_text && matches!(q.target, QueryTarget::Messages | QueryTarget::Memos) && matches!(q.query_type, QueryType::Semantic | QueryType::Exact))
        .count();
    assert!(baseline_reruns >= expected_baseline.len(), "expected at least one full baseline round to have run");
}
