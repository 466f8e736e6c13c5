//! Seed scenario: a listener holding an expired lease with partial progress
//! recorded (`processed_ids = {5}`, `last_processed_id` unchanged) is taken
//! over by a new lock instance, which sees that exact state.

mod common;

use dispatch_core::kernel::cursor_lock::{CursorLock, ProcessOutcome};
use test_context::test_context;

use common::TestHarness;

#[test_context(TestHarness)]
#[tokio::test]
async fn new_holder_sees_unchanged_cursor_and_partial_progress(ctx: &TestHarness) {
    let listener_id = "takeover-test-listener";

    // Simulate listener A: it acquired the lease, recorded partial progress
    // on event id 5, then crashed before advancing last_processed_id and
    // before its lease naturally expired.
    sqlx::query(
        r#"
        INSERT INTO listener_cursors (listener_id, last_processed_id, processed_ids, lease_holder, lease_expires_at)
        VALUES ($1, 0, ARRAY[5]::bigint[], 'ghost-holder-a', now() - interval '1 second')
        ON CONFLICT (listener_id) DO UPDATE SET
            last_processed_id = EXCLUDED.last_processed_id,
            processed_ids = EXCLUDED.processed_ids,
            lease_holder = EXCLUDED.lease_holder,
            lease_expires_at = EXCLUDED.lease_expires_at
        "#,
    )
    .bind(listener_id)
    .execute(&ctx.db_pool)
    .await
    .unwrap();

    let lock_b = CursorLock::new(ctx.db_pool.clone(), listener_id, 30_000, 10_000);

    let mut seen_last_processed_id = None;
    let mut seen_processed_ids = None;

    lock_b
        .run(5, 10, |state| {
            seen_last_processed_id = Some(state.last_processed_id);
            seen_processed_ids = Some(state.processed_ids.clone());
            async move { ProcessOutcome::NoEvents }
        })
        .await
        .unwrap();

    assert_eq!(seen_last_processed_id, Some(0));
    assert_eq!(seen_processed_ids, Some(vec![5]));
}
