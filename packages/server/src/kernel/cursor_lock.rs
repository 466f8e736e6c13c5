//! Cursor lease: mutual exclusion over a listener's position in the Event
//! Log via compare-and-swap on `(lease_holder, lease_expires_at)` — no
//! advisory locks, no table locks, grounded in the same CAS idiom the job
//! queue's claim CTE uses for its own lease.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use tokio::sync::watch;
use tracing::warn;

use super::event_log::EventId;

#[derive(Debug, Clone, FromRow)]
struct CursorRow {
    listener_id: String,
    last_processed_id: i64,
    processed_ids: Vec<i64>,
    lease_holder: Option<String>,
    lease_expires_at: Option<DateTime<Utc>>,
}

/// In-memory view of a listener's durable cursor state, including the
/// partial-progress set accumulated so far within a held lease.
#[derive(Debug, Clone)]
pub struct CursorState {
    pub last_processed_id: EventId,
    pub processed_ids: Vec<EventId>,
}

impl CursorState {
    /// Fold newly processed ids into the set, capped at `batch_size` with
    /// the oldest entries evicted first — the partial-progress set is only
    /// informally bounded by the spec; this enforces a hard cap.
    pub fn record_processed(&mut self, ids: impl IntoIterator<Item = EventId>, batch_size: usize) {
        self.processed_ids.extend(ids);
        if self.processed_ids.len() > batch_size {
            let overflow = self.processed_ids.len() - batch_size;
            self.processed_ids.drain(0..overflow);
        }
    }
}

/// Outcome of one `work` invocation under a held lease.
pub enum ProcessOutcome {
    NoEvents,
    Processed {
        new_cursor: EventId,
    },
    /// Partial progress: some events were handled (tracked in `processed_ids`)
    /// but the batch did not advance `last_processed_id` cleanly, e.g. after
    /// an isolated per-event failure.
    Partial {
        processed_ids: Vec<EventId>,
    },
    Error {
        processed_ids: Vec<EventId>,
        message: String,
    },
}

/// Acquires and renews a listener's cursor lease, running `work` while held.
pub struct CursorLock {
    pool: PgPool,
    listener_id: String,
    holder_id: String,
    lock_duration_ms: i64,
    refresh_interval_ms: i64,
}

impl CursorLock {
    pub fn new(pool: PgPool, listener_id: impl Into<String>, lock_duration_ms: i64, refresh_interval_ms: i64) -> Self {
        Self {
            pool,
            listener_id: listener_id.into(),
            holder_id: uuid::Uuid::now_v7().to_string(),
            lock_duration_ms,
            refresh_interval_ms,
        }
    }

    async fn ensure_row_exists(&self) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO listener_cursors (listener_id, last_processed_id, processed_ids)
            VALUES ($1, 0, '{}')
            ON CONFLICT (listener_id) DO NOTHING
            "#,
        )
        .bind(&self.listener_id)
        .execute(&self.pool)
        .await
        .context("failed to initialize listener cursor row")?;
        Ok(())
    }

    /// Attempt to acquire the lease: succeeds if unheld, held by this same
    /// holder (reentrant renewal), or expired (crash takeover).
    async fn acquire(&self) -> Result<Option<CursorState>> {
        self.ensure_row_exists().await?;

        let row = sqlx::query_as::<_, CursorRow>(
            r#"
            UPDATE listener_cursors
            SET lease_holder = $2,
                lease_expires_at = now() + ($3 || ' milliseconds')::interval,
                updated_at = now()
            WHERE listener_id = $1
              AND (lease_holder = $2 OR lease_holder IS NULL OR lease_expires_at < now())
            RETURNING listener_id, last_processed_id, processed_ids, lease_holder, lease_expires_at
            "#,
        )
        .bind(&self.listener_id)
        .bind(&self.holder_id)
        .bind(self.lock_duration_ms.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("failed to acquire cursor lease")?;

        Ok(row.map(|r| CursorState {
            last_processed_id: r.last_processed_id,
            processed_ids: r.processed_ids,
        }))
    }

    async fn persist(&self, last_processed_id: EventId, processed_ids: &[EventId]) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE listener_cursors
            SET last_processed_id = $2,
                processed_ids = $3,
                updated_at = now()
            WHERE listener_id = $1 AND lease_holder = $4
            "#,
        )
        .bind(&self.listener_id)
        .bind(last_processed_id)
        .bind(processed_ids)
        .bind(&self.holder_id)
        .execute(&self.pool)
        .await
        .context("failed to persist cursor progress")?;
        Ok(())
    }

    async fn release(&self) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE listener_cursors
            SET lease_holder = NULL, lease_expires_at = NULL
            WHERE listener_id = $1 AND lease_holder = $2
            "#,
        )
        .bind(&self.listener_id)
        .bind(&self.holder_id)
        .execute(&self.pool)
        .await
        .context("failed to release cursor lease")?;
        Ok(())
    }

    /// Acquire the lease (retrying with jittered backoff on contention up to
    /// `max_retries`), run `work` with the current cursor state, persist the
    /// outcome, renew via a background heartbeat task for the duration, then
    /// release.
    pub async fn run<F, Fut>(&self, max_retries: u32, base_backoff_ms: u64, work: F) -> Result<()>
    where
        F: FnOnce(CursorState) -> Fut,
        Fut: std::future::Future<Output = ProcessOutcome>,
    {
        let mut state = None;
        for attempt in 0..=max_retries {
            if let Some(s) = self.acquire().await? {
                state = Some(s);
                break;
            }
            if attempt == max_retries {
                return Ok(());
            }
            let backoff = base_backoff_ms.saturating_mul(1u64 << attempt.min(10));
            let jitter = (backoff as f64 * fastrand::f64() * 0.2) as u64;
            tokio::time::sleep(Duration::from_millis(backoff + jitter)).await;
        }
        let state = match state {
            Some(s) => s,
            None => return Ok(()),
        };

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let heartbeat = {
            let lock = self.clone_for_heartbeat();
            let refresh = Duration::from_millis(self.refresh_interval_ms as u64);
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = tokio::time::sleep(refresh) => {
                            if let Ok(false) = lock.renew().await {
                                warn!(listener_id = %lock.listener_id, "lost cursor lease during heartbeat");
                                break;
                            }
                        }
                        _ = stop_rx.changed() => break,
                    }
                }
            })
        };

        let outcome = work(state).await;
        let _ = stop_tx.send(true);
        let _ = heartbeat.await;

        match outcome {
            ProcessOutcome::NoEvents => {}
            ProcessOutcome::Processed { new_cursor } => {
                self.persist(new_cursor, &[]).await?;
            }
            ProcessOutcome::Partial { processed_ids } => {
                // last_processed_id is unchanged; only the partial-progress
                // set advances so re-delivery skips what already succeeded.
                let current = self.acquire().await?.map(|s| s.last_processed_id).unwrap_or(0);
                self.persist(current, &processed_ids).await?;
            }
            ProcessOutcome::Error { processed_ids, message } => {
                warn!(listener_id = %self.listener_id, error = %message, "listener batch failed with partial progress");
                let current = self.acquire().await?.map(|s| s.last_processed_id).unwrap_or(0);
                self.persist(current, &processed_ids).await?;
            }
        }

        self.release().await?;
        Ok(())
    }

    fn clone_for_heartbeat(&self) -> Arc<HeartbeatHandle> {
        Arc::new(HeartbeatHandle {
            pool: self.pool.clone(),
            listener_id: self.listener_id.clone(),
            holder_id: self.holder_id.clone(),
            lock_duration_ms: self.lock_duration_ms,
        })
    }
}

struct HeartbeatHandle {
    pool: PgPool,
    listener_id: String,
    holder_id: String,
    lock_duration_ms: i64,
}

impl HeartbeatHandle {
    async fn renew(&self) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE listener_cursors
            SET lease_expires_at = now() + ($2 || ' milliseconds')::interval
            WHERE listener_id = $1 AND lease_holder = $3
            "#,
        )
        .bind(&self.listener_id)
        .bind(self.lock_duration_ms.to_string())
        .bind(&self.holder_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_processed_evicts_oldest_beyond_cap() {
        let mut state = CursorState {
            last_processed_id: 0,
            processed_ids: vec![1, 2, 3],
        };
        state.record_processed([4, 5], 4);
        assert_eq!(state.processed_ids, vec![2, 3, 4, 5]);
    }

    #[test]
    fn record_processed_under_cap_keeps_all() {
        let mut state = CursorState {
            last_processed_id: 0,
            processed_ids: vec![1],
        };
        state.record_processed([2], 10);
        assert_eq!(state.processed_ids, vec![1, 2]);
    }
}
