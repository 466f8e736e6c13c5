//! AI infrastructure: the façade that wraps a model provider, the cost
//! recorder that persists every call's usage, the budget enforcer that gates
//! calls before they're made, and the repair pass for structured output.

pub mod budget;
pub mod cost;
pub mod facade;
pub mod repair;

pub use budget::{BudgetEnforcer, BudgetExceeded, BudgetReason, BudgetStatus};
pub use cost::{CostRecord, CostRecorder};
pub use facade::{AiFacade, ModelUsage, RigAiFacade};

use std::sync::Arc;

use serde_json::Value;

use crate::common::entity_ids::{SessionId, WorkspaceId};

/// Model name budget/cost accounting attributes to embed calls. rig's
/// embedding model trait has no notion of a requested model string, but the
/// façade wraps a fixed OpenAI embedding model, so this is a constant rather
/// than a parameter threaded through every caller.
pub const EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Ties the façade, budget enforcer, and cost recorder together so callers
/// never need to remember to check budget or record cost themselves.
pub struct InterceptedAi {
    facade: Arc<dyn AiFacade>,
    budget: Arc<BudgetEnforcer>,
    cost: Arc<CostRecorder>,
}

impl InterceptedAi {
    pub fn new(facade: Arc<dyn AiFacade>, budget: Arc<BudgetEnforcer>, cost: Arc<CostRecorder>) -> Self {
        Self {
            facade,
            budget,
            cost,
        }
    }

    async fn resolve_model(
        &self,
        workspace_id: WorkspaceId,
        requested_model: &str,
    ) -> anyhow::Result<String> {
        let status = self.budget.check_budget(workspace_id, requested_model).await?;

        match status.reason {
            BudgetReason::HardLimit => Err(BudgetExceeded {
                workspace_id: workspace_id.into_uuid(),
                model: requested_model.to_string(),
                percent_used: status.percent_used,
                current_usage_usd: status.current_usage_usd,
                budget_usd: status.budget_usd,
            }
            .into()),
            BudgetReason::SoftLimit => {
                Ok(status.recommended_model.unwrap_or_else(|| requested_model.to_string()))
            }
            BudgetReason::WithinBudget => Ok(requested_model.to_string()),
        }
    }

    pub async fn generate_text(
        &self,
        workspace_id: WorkspaceId,
        session_id: SessionId,
        system: &str,
        prompt: &str,
        model: &str,
    ) -> anyhow::Result<String> {
        let resolved_model = self.resolve_model(workspace_id, model).await?;
        let (text, usage) = self
            .facade
            .generate_text(system, prompt, Some(&resolved_model))
            .await?;
        self.cost
            .record_usage(workspace_id, session_id, &resolved_model, usage)
            .await;
        Ok(text)
    }

    pub async fn generate_object(
        &self,
        workspace_id: WorkspaceId,
        session_id: SessionId,
        system: &str,
        prompt: &str,
        schema: &Value,
        model: &str,
    ) -> anyhow::Result<Value> {
        let resolved_model = self.resolve_model(workspace_id, model).await?;
        let (value, usage) = self
            .facade
            .generate_object(system, prompt, schema, Some(&resolved_model))
            .await?;
        self.cost
            .record_usage(workspace_id, session_id, &resolved_model, usage)
            .await;
        Ok(value)
    }

    pub async fn embed(
        &self,
        workspace_id: WorkspaceId,
        session_id: SessionId,
        text: &str,
    ) -> anyhow::Result<Vec<f32>> {
        let resolved_model = self.resolve_model(workspace_id, EMBEDDING_MODEL).await?;
        let embedding = self.facade.embed(text).await?;
        let usage = ModelUsage::estimate(text, "");
        self.cost
            .record_usage(workspace_id, session_id, &resolved_model, usage)
            .await;
        Ok(embedding)
    }

    pub async fn embed_many(
        &self,
        workspace_id: WorkspaceId,
        session_id: SessionId,
        texts: &[String],
    ) -> anyhow::Result<Vec<Vec<f32>>> {
        let resolved_model = self.resolve_model(workspace_id, EMBEDDING_MODEL).await?;
        let embeddings = self.facade.embed_many(texts).await?;
        let usage = ModelUsage::estimate(&texts.join("\n"), "");
        self.cost
            .record_usage(workspace_id, session_id, &resolved_model, usage)
            .await;
        Ok(embeddings)
    }
}
