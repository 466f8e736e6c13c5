//! Append-only Event Log: the totally-ordered outbox every listener and job
//! enqueue builds on.
//!
//! This is a bespoke implementation rather than a user of
//! `pipeline_core::outbox::{OutboxWriter, OutboxReader}` — that trait pair is
//! keyed on a `Uuid` per entry and modeled around a claim/publish/cleanup
//! lifecycle (`claim_unpublished`/`mark_published`/`cleanup_published`) for a
//! fan-out publisher. This system's Event Log is simpler and stricter: a
//! single `BIGSERIAL` id gives total order, consumers track a durable cursor
//! rather than a published/unpublished flag, and nothing is ever deleted.
//! The two shapes diverge enough that adapting one to the other would cost
//! more clarity than it preserves; recorded as a grounding decision in
//! DESIGN.md.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{FromRow, PgConnection, PgPool};

/// A committed Event Log entry. `id` is monotonically increasing and is the
/// only ordering the system relies on.
pub type EventId = i64;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Event {
    pub id: EventId,
    pub event_type: String,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

/// Append-only store over the `events` table plus the change-notification
/// channel every listener subscribes to.
pub struct EventLog;

impl EventLog {
    /// Append an event within the caller's connection or transaction, so it
    /// commits atomically with whatever business write produced it.
    pub async fn append(conn: &mut PgConnection, event_type: &str, payload: &Value) -> Result<EventId> {
        let (id,): (EventId,) = sqlx::query_as(
            r#"
            INSERT INTO events (event_type, payload, created_at)
            VALUES ($1, $2, now())
            RETURNING id
            "#,
        )
        .bind(event_type)
        .bind(payload)
        .fetch_one(conn)
        .await
        .context("failed to append event log entry")?;

        Ok(id)
    }

    /// Fetch events with `id > after`, in ascending id order, excluding any
    /// ids already accounted for by a partial-progress set.
    pub async fn fetch_after(
        pool: &PgPool,
        after: EventId,
        max_batch: i64,
        exclude_ids: &[EventId],
    ) -> Result<Vec<Event>> {
        let events = sqlx::query_as::<_, Event>(
            r#"
            SELECT id, event_type, payload, created_at
            FROM events
            WHERE id > $1 AND NOT (id = ANY($2))
            ORDER BY id ASC
            LIMIT $3
            "#,
        )
        .bind(after)
        .bind(exclude_ids)
        .bind(max_batch)
        .fetch_all(pool)
        .await
        .context("failed to fetch events after cursor")?;

        Ok(events)
    }

    /// Notify subscribers that new events exist. The append-writer calls
    /// this right after commit; the channel name matches `CHANGE_CHANNEL`.
    pub async fn notify_change(pool: &PgPool) -> Result<()> {
        sqlx::query("SELECT pg_notify($1, '')")
            .bind(CHANGE_CHANNEL)
            .execute(pool)
            .await
            .context("failed to send change notification")?;
        Ok(())
    }
}

/// The named channel both the append-writer and every listener's
/// `LISTEN`/poll fallback use.
pub const CHANGE_CHANNEL: &str = "outbox_event";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_name_is_stable() {
        assert_eq!(CHANGE_CHANNEL, "outbox_event");
    }
}
