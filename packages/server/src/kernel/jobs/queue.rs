//! PostgreSQL-backed durable job queue.
//!
//! Jobs are claimed with `FOR UPDATE SKIP LOCKED`, the same CTE shape the
//! source project's job table uses, folding stale-lease reclaim into the same
//! `WHERE` clause rather than a separate sweep.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use super::job::{ErrorKind, Job, JobPriority};

/// Result of an enqueue call: distinguishes a freshly inserted row from a
/// `message_id` collision that returned the existing row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueResult {
    Created(Uuid),
    Duplicate(Uuid),
}

impl EnqueueResult {
    pub fn job_id(&self) -> Uuid {
        match self {
            EnqueueResult::Created(id) | EnqueueResult::Duplicate(id) => *id,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, EnqueueResult::Created(_))
    }
}

/// A claimed job ready for execution.
#[derive(Debug)]
pub struct ClaimedJob {
    pub id: Uuid,
    pub job: Job,
}

impl ClaimedJob {
    pub fn deserialize<C: DeserializeOwned>(&self) -> Result<C> {
        serde_json::from_value(self.job.payload.clone())
            .map_err(|e| anyhow::anyhow!("failed to deserialize job {} payload: {}", self.id, e))
    }

    pub fn queue(&self) -> &str {
        &self.job.queue
    }
}

/// Options for enqueuing a job: idempotency and singleton dedup, priority,
/// retry policy.
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    pub message_id: Option<String>,
    pub singleton_key: Option<String>,
    pub singleton_window_seconds: Option<i32>,
    pub priority: JobPriority,
    pub max_attempts: i32,
    pub base_backoff_ms: i64,
    pub run_at: Option<chrono::DateTime<Utc>>,
}

impl EnqueueOptions {
    pub fn new() -> Self {
        Self {
            max_attempts: 5,
            base_backoff_ms: 1000,
            ..Default::default()
        }
    }
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, queue: &str, payload: Value, options: EnqueueOptions) -> Result<EnqueueResult>;

    /// Claim up to `limit` jobs for processing, highest priority first, FIFO
    /// within a priority by `next_attempt_at`.
    async fn claim(&self, worker_id: &str, limit: i64, lock_duration_ms: i64) -> Result<Vec<ClaimedJob>>;

    async fn mark_succeeded(&self, job_id: Uuid) -> Result<()>;

    async fn mark_failed(&self, job_id: Uuid, error: &str, kind: ErrorKind) -> Result<()>;

    async fn heartbeat(&self, job_id: Uuid, lock_duration_ms: i64) -> Result<()>;
}

/// PostgreSQL-backed implementation against the `job_queue_messages` table.
pub struct PostgresJobQueue {
    pool: PgPool,
}

impl PostgresJobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_by_message_id(&self, message_id: &str) -> Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>(
            r#"
            SELECT id, queue, payload, message_id, singleton_key, singleton_window_seconds,
                   priority, status, next_attempt_at, attempts, max_attempts, base_backoff_ms,
                   locked_by, lock_expires_at, last_error, last_error_kind, created_at, updated_at
            FROM job_queue_messages
            WHERE message_id = $1
            LIMIT 1
            "#,
        )
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(job)
    }

    /// A non-terminal job sharing `singleton_key`, inserted within the last
    /// `window_seconds`, suppresses this enqueue.
    async fn find_active_singleton(&self, singleton_key: &str, window_seconds: i32) -> Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>(
            r#"
            SELECT id, queue, payload, message_id, singleton_key, singleton_window_seconds,
                   priority, status, next_attempt_at, attempts, max_attempts, base_backoff_ms,
                   locked_by, lock_expires_at, last_error, last_error_kind, created_at, updated_at
            FROM job_queue_messages
            WHERE singleton_key = $1
              AND status IN ('pending', 'running')
              AND created_at >= now() - ($2 || ' seconds')::interval
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(singleton_key)
        .bind(window_seconds.to_string())
        .fetch_optional(&self.pool)
        .await?;

        Ok(job)
    }
}

#[async_trait]
impl JobQueue for PostgresJobQueue {
    async fn enqueue(&self, queue: &str, payload: Value, options: EnqueueOptions) -> Result<EnqueueResult> {
        if let Some(message_id) = &options.message_id {
            if let Some(existing) = self.find_by_message_id(message_id).await? {
                return Ok(EnqueueResult::Duplicate(existing.id));
            }
        }

        if let (Some(key), Some(window)) = (&options.singleton_key, options.singleton_window_seconds) {
            if let Some(existing) = self.find_active_singleton(key, window).await? {
                return Ok(EnqueueResult::Duplicate(existing.id));
            }
        }

        let job = Job::builder()
            .queue(queue.to_string())
            .payload(payload)
            .message_id(options.message_id)
            .singleton_key(options.singleton_key)
            .singleton_window_seconds(options.singleton_window_seconds)
            .priority(options.priority)
            .next_attempt_at(options.run_at.unwrap_or_else(Utc::now))
            .max_attempts(options.max_attempts)
            .base_backoff_ms(options.base_backoff_ms)
            .build();

        let inserted: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO job_queue_messages
                (id, queue, payload, message_id, singleton_key, singleton_window_seconds,
                 priority, status, next_attempt_at, attempts, max_attempts, base_backoff_ms,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending', $8, 0, $9, $10, now(), now())
            ON CONFLICT (message_id) WHERE message_id IS NOT NULL DO NOTHING
            RETURNING id
            "#,
        )
        .bind(job.id)
        .bind(&job.queue)
        .bind(&job.payload)
        .bind(&job.message_id)
        .bind(&job.singleton_key)
        .bind(job.singleton_window_seconds)
        .bind(job.priority)
        .bind(job.next_attempt_at)
        .bind(job.max_attempts)
        .bind(job.base_backoff_ms)
        .fetch_optional(&self.pool)
        .await?;

        match inserted {
            Some((id,)) => Ok(EnqueueResult::Created(id)),
            None => {
                // Conflict raced us: another caller's row won, look it up.
                // DO NOTHING only fires via the partial unique index on
                // message_id, so a message_id must have been set here.
                let message_id = options.message_id.as_deref().expect("conflict without a message_id is unreachable");
                let existing = self
                    .find_by_message_id(message_id)
                    .await?
                    .context("insert conflicted but no row found by message_id")?;
                Ok(EnqueueResult::Duplicate(existing.id))
            }
        }
    }

    async fn claim(&self, worker_id: &str, limit: i64, lock_duration_ms: i64) -> Result<Vec<ClaimedJob>> {
        let jobs = sqlx::query_as::<_, Job>(
            r#"
            WITH next_jobs AS (
                SELECT id
                FROM job_queue_messages
                WHERE
                    (status = 'pending' AND next_attempt_at <= now())
                    OR (status = 'running' AND lock_expires_at < now())
                ORDER BY priority, next_attempt_at
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE job_queue_messages
            SET status = 'running',
                locked_by = $2,
                lock_expires_at = now() + ($3 || ' milliseconds')::interval,
                updated_at = now()
            WHERE id IN (SELECT id FROM next_jobs)
            RETURNING id, queue, payload, message_id, singleton_key, singleton_window_seconds,
                      priority, status, next_attempt_at, attempts, max_attempts, base_backoff_ms,
                      locked_by, lock_expires_at, last_error, last_error_kind, created_at, updated_at
            "#,
        )
        .bind(limit)
        .bind(worker_id)
        .bind(lock_duration_ms.to_string())
        .fetch_all(&self.pool)
        .await?;

        Ok(jobs.into_iter().map(|job| ClaimedJob { id: job.id, job }).collect())
    }

    async fn mark_succeeded(&self, job_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE job_queue_messages
            SET status = 'succeeded', updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_failed(&self, job_id: Uuid, error: &str, kind: ErrorKind) -> Result<()> {
        let job = Job::find_by_id(job_id, &self.pool)
            .await?
            .ok_or_else(|| anyhow::anyhow!("job {job_id} not found"))?;

        if kind.should_retry() && job.attempts + 1 < job.max_attempts {
            let delay = Job::backoff_delay(job.base_backoff_ms, job.attempts + 1);
            sqlx::query(
                r#"
                UPDATE job_queue_messages
                SET status = 'pending',
                    attempts = attempts + 1,
                    next_attempt_at = now() + ($1 || ' milliseconds')::interval,
                    last_error = $2,
                    last_error_kind = $3,
                    locked_by = NULL,
                    lock_expires_at = NULL,
                    updated_at = now()
                WHERE id = $4
                "#,
            )
            .bind(delay.num_milliseconds().to_string())
            .bind(error)
            .bind(kind)
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        } else {
            sqlx::query(
                r#"
                UPDATE job_queue_messages
                SET status = CASE WHEN $1::text = 'non_retryable' THEN 'failed' ELSE 'dead' END,
                    attempts = attempts + 1,
                    last_error = $2,
                    last_error_kind = $1,
                    updated_at = now()
                WHERE id = $3
                "#,
            )
            .bind(kind)
            .bind(error)
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        }

        Ok(())
    }

    async fn heartbeat(&self, job_id: Uuid, lock_duration_ms: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE job_queue_messages
            SET lock_expires_at = now() + ($1 || ' milliseconds')::interval,
                updated_at = now()
            WHERE id = $2 AND status = 'running'
            "#,
        )
        .bind(lock_duration_ms.to_string())
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enqueue_result_helpers() {
        let created = EnqueueResult::Created(Uuid::now_v7());
        assert!(created.is_created());

        let duplicate = EnqueueResult::Duplicate(Uuid::now_v7());
        assert!(!duplicate.is_created());
    }

    #[test]
    fn default_options_allow_retries() {
        let opts = EnqueueOptions::new();
        assert_eq!(opts.max_attempts, 5);
        assert_eq!(opts.base_backoff_ms, 1000);
    }
}
