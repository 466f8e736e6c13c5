//! Write-through cache for retrieval results, keyed by the trigger
//! message's id. A second event touching the same trigger message (for
//! example a boundary-extraction retry) reuses the prior retrieval instead
//! of re-running every search.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};

use super::RetrievalResult;
use crate::common::entity_ids::{MessageId, WorkspaceId};

#[derive(Debug, Clone)]
pub struct CachedRetrieval {
    pub result: RetrievalResult,
    pub cached_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct CacheRow {
    result: serde_json::Value,
    created_at: DateTime<Utc>,
}

pub async fn get_cached(pool: &PgPool, trigger_message_id: MessageId) -> Result<Option<CachedRetrieval>> {
    let row = sqlx::query_as::<_, CacheRow>(
        r#"SELECT result, created_at FROM retrieval_cache WHERE trigger_message_id = $1"#,
    )
    .bind(trigger_message_id.into_uuid())
    .fetch_optional(pool)
    .await
    .context("failed to read retrieval cache")?;

    Ok(match row {
        Some(r) => Some(CachedRetrieval {
            result: serde_json::from_value(r.result).context("failed to deserialize cached retrieval result")?,
            cached_at: r.created_at,
        }),
        None => None,
    })
}

pub async fn store_cached(
    pool: &PgPool,
    workspace_id: WorkspaceId,
    trigger_message_id: MessageId,
    result: &RetrievalResult,
) -> Result<()> {
    let payload = serde_json::to_value(result).context("failed to serialize retrieval result")?;

    sqlx::query(
        r#"INSERT INTO retrieval_cache (trigger_message_id, workspace_id, result, created_at)
           VALUES ($1, $2, $3, now())
           ON CONFLICT (trigger_message_id) DO UPDATE SET result = EXCLUDED.result, created_at = now()"#,
    )
    .bind(trigger_message_id.into_uuid())
    .bind(workspace_id.into_uuid())
    .bind(payload)
    .execute(pool)
    .await
    .context("failed to write retrieval cache")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cached_retrieval_round_trips_through_json() {
        let result = RetrievalResult::default();
        let value = serde_json::to_value(&result).unwrap();
        let restored: RetrievalResult = serde_json::from_value(value).unwrap();
        assert_eq!(restored.searches_performed.len(), 0);
    }
}
