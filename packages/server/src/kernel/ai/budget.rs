//! Budget enforcement: a pre-call policy check that may downgrade or block
//! a model before the façade ever issues a provider request.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use thiserror::Error;
use tracing::warn;

use crate::common::entity_ids::WorkspaceId;

/// Why a budget check came back the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetReason {
    WithinBudget,
    SoftLimit,
    HardLimit,
}

/// Result of a pre-call budget check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetStatus {
    pub current_usage_usd: f64,
    pub budget_usd: f64,
    pub percent_used: f64,
    pub reason: BudgetReason,
    /// Present only when `reason == SoftLimit`: the cheaper model to
    /// substitute in place of the one requested.
    pub recommended_model: Option<String>,
}

/// Raised when a hard budget limit blocks a call. Must propagate to the
/// caller without any cost-record side effect — no provider request was made.
#[derive(Debug, Error)]
#[error("budget exceeded for workspace {workspace_id}: {percent_used:.1}% of ${budget_usd:.2} used (requested model {model})")]
pub struct BudgetExceeded {
    pub workspace_id: uuid::Uuid,
    pub model: String,
    pub percent_used: f64,
    pub current_usage_usd: f64,
    pub budget_usd: f64,
}

#[derive(Debug, FromRow)]
struct WorkspaceBudgetRow {
    budget_usd: f64,
    soft_limit_pct: f64,
    hard_limit_pct: f64,
    substitution_map: serde_json::Value,
}

/// Reads `workspace_budgets` plus a rolling usage aggregate, both
/// non-transactionally — budget freshness is best-effort, matching the rest
/// of the system's "no mutual exclusion needed here" stance on read-mostly
/// policy state.
pub struct BudgetEnforcer {
    pool: PgPool,
}

impl BudgetEnforcer {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn check_budget(
        &self,
        workspace_id: WorkspaceId,
        requested_model: &str,
    ) -> anyhow::Result<BudgetStatus> {
        let budget: Option<WorkspaceBudgetRow> = sqlx::query_as(
            r#"
            SELECT budget_usd, soft_limit_pct, hard_limit_pct, substitution_map
            FROM workspace_budgets
            WHERE workspace_id = $1
            "#,
        )
        .bind(workspace_id.into_uuid())
        .fetch_optional(&self.pool)
        .await?;

        let Some(budget) = budget else {
            // No budget row configured for this workspace: treat as unlimited.
            return Ok(BudgetStatus {
                current_usage_usd: 0.0,
                budget_usd: f64::MAX,
                percent_used: 0.0,
                reason: BudgetReason::WithinBudget,
                recommended_model: None,
            });
        };

        let current_usage_usd: f64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(cost_usd), 0.0)
            FROM cost_records
            WHERE workspace_id = $1
              AND created_at >= date_trunc('month', now())
            "#,
        )
        .bind(workspace_id.into_uuid())
        .fetch_one(&self.pool)
        .await?;

        let percent_used = if budget.budget_usd > 0.0 {
            (current_usage_usd / budget.budget_usd) * 100.0
        } else {
            100.0
        };

        if percent_used >= budget.hard_limit_pct {
            warn!(%workspace_id, percent_used, model = requested_model, "budget hard limit reached, blocking call");
            return Ok(BudgetStatus {
                current_usage_usd,
                budget_usd: budget.budget_usd,
                percent_used,
                reason: BudgetReason::HardLimit,
                recommended_model: None,
            });
        }

        if percent_used >= budget.soft_limit_pct {
            let recommended_model = budget
                .substitution_map
                .get(requested_model)
                .and_then(|v| v.as_str())
                .map(str::to_string);

            if recommended_model.is_some() {
                warn!(%workspace_id, percent_used, model = requested_model, recommended = ?recommended_model, "budget soft limit reached, substituting model");
            }

            return Ok(BudgetStatus {
                current_usage_usd,
                budget_usd: budget.budget_usd,
                percent_used,
                reason: BudgetReason::SoftLimit,
                recommended_model,
            });
        }

        Ok(BudgetStatus {
            current_usage_usd,
            budget_usd: budget.budget_usd,
            percent_used,
            reason: BudgetReason::WithinBudget,
            recommended_model: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_exceeded_error_message_includes_context() {
        let err = BudgetExceeded {
            workspace_id: uuid::Uuid::nil(),
            model: "claude-3-5-sonnet-latest".to_string(),
            percent_used: 101.5,
            current_usage_usd: 101.5,
            budget_usd: 100.0,
        };
        let message = err.to_string();
        assert!(message.contains("claude-3-5-sonnet-latest"));
        assert!(message.contains("101.5"));
    }
}
