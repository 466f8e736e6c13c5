//! Job model for background command execution.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use typed_builder::TypedBuilder;
use uuid::Uuid;

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "job_status", rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Dead,
}

/// Priority ordering, lowest value claimed first. Renamed from the source's
/// `Critical/High/Normal/Low` to this system's own vocabulary; ordering is
/// unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "job_priority", rename_all = "snake_case")]
pub enum JobPriority {
    Urgent,
    High,
    #[default]
    Normal,
    Low,
}

impl JobPriority {
    /// Convert to integer for DB ordering (lower = claimed first).
    pub fn as_i16(&self) -> i16 {
        match self {
            JobPriority::Urgent => 0,
            JobPriority::High => 1,
            JobPriority::Normal => 2,
            JobPriority::Low => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "error_kind", rename_all = "snake_case")]
pub enum ErrorKind {
    /// Transient error - will retry if attempts remain
    #[default]
    Retryable,
    /// Permanent error - will not retry
    NonRetryable,
}

impl ErrorKind {
    pub fn should_retry(&self) -> bool {
        matches!(self, ErrorKind::Retryable)
    }
}

// ============================================================================
// Job Model
// ============================================================================

#[derive(FromRow, Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Job {
    #[builder(default = Uuid::now_v7())]
    pub id: Uuid,

    pub queue: String,
    pub payload: serde_json::Value,

    /// Caller-supplied idempotency key; duplicate enqueues with the same key
    /// return the existing row instead of inserting a new one.
    #[builder(default, setter(strip_option))]
    pub message_id: Option<String>,

    /// Dedup key used to suppress re-insertion while a non-terminal job with
    /// the same key exists within `singleton_window_seconds` of its creation.
    #[builder(default, setter(strip_option))]
    pub singleton_key: Option<String>,
    #[builder(default, setter(strip_option))]
    pub singleton_window_seconds: Option<i32>,

    #[builder(default)]
    pub priority: JobPriority,
    #[builder(default)]
    pub status: JobStatus,

    #[builder(default = Utc::now())]
    pub next_attempt_at: DateTime<Utc>,
    #[builder(default = 0)]
    pub attempts: i32,
    #[builder(default = 5)]
    pub max_attempts: i32,
    #[builder(default = 1000)]
    pub base_backoff_ms: i64,

    #[builder(default, setter(strip_option))]
    pub locked_by: Option<String>,
    #[builder(default, setter(strip_option))]
    pub lock_expires_at: Option<DateTime<Utc>>,

    #[builder(default, setter(strip_option))]
    pub last_error: Option<String>,
    #[builder(default, setter(strip_option))]
    pub last_error_kind: Option<ErrorKind>,

    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Exponential backoff with jitter: `baseBackoff * 2^attempts`, jittered
    /// by up to 20% to avoid thundering-herd retries.
    pub fn backoff_delay(base_backoff_ms: i64, attempts: i32) -> chrono::Duration {
        let exp = 2i64.saturating_pow(attempts.max(0) as u32).min(3600);
        let base = base_backoff_ms.saturating_mul(exp);
        let jitter_frac = fastrand::f64() * 0.2;
        let jittered = (base as f64 * (1.0 + jitter_frac)) as i64;
        chrono::Duration::milliseconds(jittered.max(0))
    }

    pub async fn find_by_id(id: Uuid, pool: &PgPool) -> Result<Option<Self>> {
        let job = sqlx::query_as::<_, Self>(
            r#"
            SELECT id, queue, payload, message_id, singleton_key, singleton_window_seconds,
                   priority, status, next_attempt_at, attempts, max_attempts, base_backoff_ms,
                   locked_by, lock_expires_at, last_error, last_error_kind, created_at, updated_at
            FROM job_queue_messages
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_ordering_claims_urgent_first() {
        assert!(JobPriority::Urgent.as_i16() < JobPriority::High.as_i16());
        assert!(JobPriority::High.as_i16() < JobPriority::Normal.as_i16());
        assert!(JobPriority::Normal.as_i16() < JobPriority::Low.as_i16());
    }

    #[test]
    fn backoff_grows_with_attempts_and_stays_positive() {
        let d0 = Job::backoff_delay(1000, 0);
        let d5 = Job::backoff_delay(1000, 5);
        assert!(d5.num_milliseconds() > d0.num_milliseconds());
        assert!(d0.num_milliseconds() > 0);
    }

    #[test]
    fn error_kind_retry_policy() {
        assert!(ErrorKind::Retryable.should_retry());
        assert!(!ErrorKind::NonRetryable.should_retry());
    }
}
