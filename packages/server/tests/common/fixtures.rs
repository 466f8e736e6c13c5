//! Fixtures for building up the entity graph (workspace -> stream -> actor ->
//! message) that every domain worker test needs as a starting point.

use anyhow::Result;
use sqlx::PgPool;
use uuid::Uuid;

pub async fn create_workspace(pool: &PgPool, name: &str) -> Result<Uuid> {
    let id = Uuid::now_v7();
    sqlx::query("INSERT INTO workspaces (id, name) VALUES ($1, $2)")
        .bind(id)
        .bind(name)
        .execute(pool)
        .await?;
    Ok(id)
}

pub async fn create_actor(pool: &PgPool, workspace_id: Uuid, display_name: &str) -> Result<Uuid> {
    let id = Uuid::now_v7();
    sqlx::query("INSERT INTO actors (id, workspace_id, display_name) VALUES ($1, $2, $3)")
        .bind(id)
        .bind(workspace_id)
        .bind(display_name)
        .execute(pool)
        .await?;
    Ok(id)
}

pub async fn create_stream(pool: &PgPool, workspace_id: Uuid, is_direct_message: bool) -> Result<Uuid> {
    let id = Uuid::now_v7();
    sqlx::query("INSERT INTO streams (id, workspace_id, is_direct_message) VALUES ($1, $2, $3)")
        .bind(id)
        .bind(workspace_id)
        .bind(is_direct_message)
        .execute(pool)
        .await?;
    Ok(id)
}

pub async fn add_stream_member(pool: &PgPool, stream_id: Uuid, actor_id: Uuid) -> Result<()> {
    sqlx::query("INSERT INTO stream_members (stream_id, actor_id) VALUES ($1, $2)")
        .bind(stream_id)
        .bind(actor_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn create_message(pool: &PgPool, stream_id: Uuid, author_id: Uuid, content: &str) -> Result<Uuid> {
    let id = Uuid::now_v7();
    sqlx::query("INSERT INTO messages (id, stream_id, author_id, content) VALUES ($1, $2, $3, $4)")
        .bind(id)
        .bind(stream_id)
        .bind(author_id)
        .bind(content)
        .execute(pool)
        .await?;
    Ok(id)
}

pub async fn create_conversation(pool: &PgPool, stream_id: Uuid, trigger_message_id: Uuid) -> Result<Uuid> {
    let id = Uuid::now_v7();
    sqlx::query("INSERT INTO conversations (id, stream_id, trigger_message_id) VALUES ($1, $2, $3)")
        .bind(id)
        .bind(stream_id)
        .bind(trigger_message_id)
        .execute(pool)
        .await?;
    Ok(id)
}

pub async fn set_workspace_budget(pool: &PgPool, workspace_id: Uuid, budget_usd: f64, hard_limit_pct: f64) -> Result<()> {
    sqlx::query(
        "INSERT INTO workspace_budgets (workspace_id, budget_usd, soft_limit_pct, hard_limit_pct) VALUES ($1, $2, 80.0, $3)",
    )
    .bind(workspace_id)
    .bind(budget_usd)
    .bind(hard_limit_pct)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn record_cost(pool: &PgPool, workspace_id: Uuid, session_id: Uuid, cost_usd: f64) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO cost_records (id, workspace_id, session_id, model, prompt_tokens, completion_tokens, cost_usd)
        VALUES ($1, $2, $3, 'claude-3-5-sonnet-latest', 100, 100, $4)
        "#,
    )
    .bind(Uuid::now_v7())
    .bind(workspace_id)
    .bind(session_id)
    .bind(cost_usd)
    .execute(pool)
    .await?;
    Ok(())
}
