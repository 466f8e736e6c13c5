//! Cost interception: every façade call records a `CostRecord` keyed to the
//! session that triggered it, on a best-effort basis — a failure to persist
//! the record never fails the call it's measuring.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use tracing::warn;

use crate::common::entity_ids::SessionId;
use crate::common::entity_ids::WorkspaceId;

use super::facade::ModelUsage;

/// USD cost per 1,000 tokens, split prompt/completion, per model name.
/// Unknown models fall back to a conservative default rate.
fn per_thousand_rate(model: &str) -> (f64, f64) {
    match model {
        m if m.contains("claude-3-5-sonnet") => (0.003, 0.015),
        m if m.contains("claude-3-5-haiku") => (0.0008, 0.004),
        m if m.contains("text-embedding-3-small") => (0.00002, 0.0),
        _ => (0.003, 0.015),
    }
}

pub fn estimate_cost_usd(model: &str, usage: ModelUsage) -> f64 {
    let (prompt_rate, completion_rate) = per_thousand_rate(model);
    let prompt_cost = (usage.prompt_tokens as f64 / 1000.0) * prompt_rate;
    let completion_cost = (usage.completion_tokens as f64 / 1000.0) * completion_rate;
    prompt_cost + completion_cost
}

/// A persisted record of one model call's cost, for budget accounting and audit.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CostRecord {
    pub id: uuid::Uuid,
    pub workspace_id: uuid::Uuid,
    pub session_id: uuid::Uuid,
    pub model: String,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub cost_usd: f64,
    pub created_at: DateTime<Utc>,
}

/// Records cost for each AI façade call, against whichever connection the
/// caller is already inside, or the pool directly when called standalone.
pub struct CostRecorder {
    pool: PgPool,
}

impl CostRecorder {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Record usage against an explicit executor (a transaction the caller
    /// already holds, so the cost row commits or rolls back with the rest of
    /// the work it was spent on).
    pub async fn record_usage_in<'e, E>(
        &self,
        executor: E,
        workspace_id: WorkspaceId,
        session_id: SessionId,
        model: &str,
        usage: ModelUsage,
    ) -> anyhow::Result<()>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let cost_usd = estimate_cost_usd(model, usage);
        sqlx::query(
            r#"
            INSERT INTO cost_records (id, workspace_id, session_id, model, prompt_tokens, completion_tokens, cost_usd, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, now())
            "#,
        )
        .bind(uuid::Uuid::now_v7())
        .bind(workspace_id.into_uuid())
        .bind(session_id.into_uuid())
        .bind(model)
        .bind(usage.prompt_tokens)
        .bind(usage.completion_tokens)
        .bind(cost_usd)
        .execute(executor)
        .await?;

        Ok(())
    }

    /// Record usage standalone against the pool. Errors are logged and
    /// swallowed — a missed cost row must never fail the caller's real work.
    pub async fn record_usage(
        &self,
        workspace_id: WorkspaceId,
        session_id: SessionId,
        model: &str,
        usage: ModelUsage,
    ) {
        if let Err(e) = self
            .record_usage_in(&self.pool, workspace_id, session_id, model, usage)
            .await
        {
            warn!(error = %e, %model, "failed to record AI cost, continuing");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_model_rate_is_nonzero() {
        let cost = estimate_cost_usd(
            "claude-3-5-sonnet-latest",
            ModelUsage {
                prompt_tokens: 1000,
                completion_tokens: 1000,
                total_tokens: 2000,
            },
        );
        assert!(cost > 0.0);
    }

    #[test]
    fn unknown_model_falls_back_to_default_rate() {
        let cost = estimate_cost_usd(
            "some-future-model",
            ModelUsage {
                prompt_tokens: 1000,
                completion_tokens: 0,
                total_tokens: 1000,
            },
        );
        assert_eq!(cost, 0.003);
    }

    #[test]
    fn embedding_model_has_no_completion_cost() {
        let cost = estimate_cost_usd(
            "text-embedding-3-small",
            ModelUsage {
                prompt_tokens: 1000,
                completion_tokens: 500,
                total_tokens: 1500,
            },
        );
        assert_eq!(cost, 0.00002);
    }
}
