//! Per-query execution rules: run one `RetrievalQuery` against the store it
//! targets, scoped by an `AccessSpec`, and return ranked hits.
//!
//! The `messages` target hybrid-ranks semantic and exact results with
//! reciprocal rank fusion, grounded directly on the source recall
//! pipeline's `hybrid_rank`: each result's score is summed across the
//! result lists it appears in, weighted `1 / (K + rank + 1)` per list, with
//! `K = 60.0`. Memos and attachments are smaller corpora per stream and are
//! ranked by a single list (semantic distance or `ILIKE`, whichever the
//! query asked for) without fusion.

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use pgvector::Vector;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use tracing::warn;

use super::{AccessSpec, AttachmentHit, MemoHit, MessageHit, QueryTarget, QueryType, RetrievalQuery};
use crate::common::entity_ids::{AttachmentId, MemoId, MessageId, SessionId, StreamId, WorkspaceId};
use crate::kernel::InterceptedAi;

const RRF_K: f32 = 60.0;

pub enum QueryHits {
    Memos(Vec<MemoHit>),
    Messages(Vec<MessageHit>),
    Attachments(Vec<AttachmentHit>),
}

#[derive(FromRow)]
struct MemoRow {
    memo_id: uuid::Uuid,
    stream_id: uuid::Uuid,
    content: String,
    distance: Option<f64>,
}

#[derive(FromRow, Clone)]
struct MessageRow {
    message_id: uuid::Uuid,
    stream_id: uuid::Uuid,
    content: String,
    distance: Option<f64>,
}

#[derive(FromRow)]
struct AttachmentRow {
    attachment_id: uuid::Uuid,
    stream_id: uuid::Uuid,
    caption: String,
}

fn bind_stream_scope<'a>(qb: &mut QueryBuilder<'a, Postgres>, access: &'a AccessSpec) {
    match access {
        AccessSpec::AllStreams => {}
        AccessSpec::StreamIds(ids) => {
            let uuids: Vec<uuid::Uuid> = ids.iter().map(|id| id.into_uuid()).collect();
            qb.push(" AND stream_id = ANY(").push_bind(uuids).push(")");
        }
        AccessSpec::MemberUnion(actor_ids) => {
            let uuids: Vec<uuid::Uuid> = actor_ids.iter().map(|id| id.into_uuid()).collect();
            qb.push(" AND stream_id IN (SELECT stream_id FROM stream_members WHERE actor_id = ANY(")
                .push_bind(uuids)
                .push("))");
        }
    }
}

#[allow(clippy::too_many_arguments)]
pub async fn execute_query(
    pool: &PgPool,
    ai: &InterceptedAi,
    workspace_id: WorkspaceId,
    session_id: SessionId,
    access: &AccessSpec,
    query: &RetrievalQuery,
    limit: i64,
    semantic_distance_threshold: f64,
    excluded: &[MessageId],
) -> Result<QueryHits> {
    match query.target {
        QueryTarget::Memos => Ok(QueryHits::Memos(
            search_memos(pool, ai, workspace_id, session_id, access, query, limit, semantic_distance_threshold).await?,
        )),
        QueryTarget::Messages => Ok(QueryHits::Messages(
            search_messages(pool, ai, workspace_id, session_id, access, query, limit, semantic_distance_threshold, excluded).await?,
        )),
        QueryTarget::Attachments => Ok(QueryHits::Attachments(search_attachments(pool, access, query, limit).await?)),
    }
}

/// memos, semantic: embed and run a distance-threshold vector search;
/// if that comes back empty, fall back to a full-text search over memos
/// rather than reporting no hits at all.
/// memos, exact: full-text search over memos directly.
#[allow(clippy::too_many_arguments)]
async fn search_memos(
    pool: &PgPool,
    ai: &InterceptedAi,
    workspace_id: WorkspaceId,
    session_id: SessionId,
    access: &AccessSpec,
    query: &RetrievalQuery,
    limit: i64,
    semantic_distance_threshold: f64,
) -> Result<Vec<MemoHit>> {
    let rows: Vec<MemoRow> = match query.query_type {
        QueryType::Semantic => {
            let embedding = Vector::from(ai.embed(workspace_id, session_id, &query.text).await?);
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
                "SELECT id AS memo_id, stream_id, content, embedding <=> ",
            );
            qb.push_bind(embedding.clone()).push(" AS distance FROM memos WHERE embedding <=> ");
            qb.push_bind(embedding).push(" < ").push_bind(semantic_distance_threshold).push(" AND true");
            bind_stream_scope(&mut qb, access);
            qb.push(" ORDER BY distance ASC LIMIT ").push_bind(limit);
            let semantic_rows = qb.build_query_as().fetch_all(pool).await?;
            if semantic_rows.is_empty() {
                full_text_search_memos(pool, access, &query.text, limit).await?
            } else {
                semantic_rows
            }
        }
        QueryType::Exact => full_text_search_memos(pool, access, &query.text, limit).await?,
    };

    Ok(rows
        .into_iter()
        .map(|r| MemoHit {
            memo_id: MemoId::from_uuid(r.memo_id),
            stream_id: StreamId::from_uuid(r.stream_id),
            content: r.content,
            score: r.distance.map(|d| 1.0 - d as f32).unwrap_or(0.5),
        })
        .collect())
}

async fn full_text_search_memos(pool: &PgPool, access: &AccessSpec, text: &str, limit: i64) -> Result<Vec<MemoRow>> {
    let pattern = format!("%{}%", text.replace('%', ""));
    let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
        "SELECT id AS memo_id, stream_id, content, NULL::float8 AS distance FROM memos WHERE content ILIKE ",
    );
    qb.push_bind(pattern).push(" AND true");
    bind_stream_scope(&mut qb, access);
    qb.push(" ORDER BY updated_at DESC LIMIT ").push_bind(limit);
    Ok(qb.build_query_as().fetch_all(pool).await?)
}

/// attachments, *: keyword search over filename and extraction text, never
/// semantic. The attachments table carries only a single `caption` column
/// rather than separate filename/extraction-text fields, so that column is
/// the one searched for both query types.
async fn search_attachments(pool: &PgPool, access: &AccessSpec, query: &RetrievalQuery, limit: i64) -> Result<Vec<AttachmentHit>> {
    let pattern = format!("%{}%", query.text.replace('%', ""));
    let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
        "SELECT id AS attachment_id, stream_id, caption FROM attachments WHERE caption ILIKE ",
    );
    qb.push_bind(pattern).push(" AND true");
    bind_stream_scope(&mut qb, access);
    qb.push(" ORDER BY created_at DESC LIMIT ").push_bind(limit);
    let rows: Vec<AttachmentRow> = qb.build_query_as().fetch_all(pool).await?;

    Ok(rows
        .into_iter()
        .map(|r| AttachmentHit {
            attachment_id: AttachmentId::from_uuid(r.attachment_id),
            stream_id: StreamId::from_uuid(r.stream_id),
            caption: r.caption,
            score: 1.0,
        })
        .collect())
}

/// messages, *: exact queries are quote-wrapped for the keyword pass so a
/// phrase match is requested rather than a loose substring one; semantic
/// queries use the text as-is. Both types still run the same hybrid
/// semantic+keyword procedure — `query_type` only changes the keyword
/// phrasing, per the source recall pipeline's fusion of the two passes.
///
/// If embedding the query text fails, the search degrades to keyword-only
/// instead of aborting. If the fused (semantic+keyword) result is empty but
/// the keyword pass alone found rows, the keyword-only list is used as a
/// retry rather than reporting nothing.
#[allow(clippy::too_many_arguments)]
async fn search_messages(
    pool: &PgPool,
    ai: &InterceptedAi,
    workspace_id: WorkspaceId,
    session_id: SessionId,
    access: &AccessSpec,
    query: &RetrievalQuery,
    limit: i64,
    semantic_distance_threshold: f64,
    excluded: &[MessageId],
) -> Result<Vec<MessageHit>> {
    let excluded_uuids: Vec<uuid::Uuid> = excluded.iter().map(|id| id.into_uuid()).collect();

    let embedding = match ai.embed(workspace_id, session_id, &query.text).await {
        Ok(vector) => Some(Vector::from(vector)),
        Err(err) => {
            warn!(error = %err, "message embedding failed, falling back to keyword-only search");
            None
        }
    };

    let semantic_rows: Vec<MessageRow> = if let Some(embedding) = embedding {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "SELECT id AS message_id, stream_id, content, embedding <=> ",
        );
        qb.push_bind(embedding.clone()).push(" AS distance FROM messages WHERE embedding <=> ");
        qb.push_bind(embedding).push(" < ").push_bind(semantic_distance_threshold);
        qb.push(" AND NOT (id = ANY(").push_bind(excluded_uuids.clone()).push("))");
        bind_stream_scope(&mut qb, access);
        qb.push(" ORDER BY distance ASC LIMIT ").push_bind(limit * 2);
        qb.build_query_as().fetch_all(pool).await?
    } else {
        Vec::new()
    };

    let keyword_text = match query.query_type {
        QueryType::Exact => format!("\"{}\"", query.text),
        QueryType::Semantic => query.text.clone(),
    };
    let pattern = format!("%{}%", keyword_text.replace('%', ""));
    let keyword_rows: Vec<MessageRow> = {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "SELECT id AS message_id, stream_id, content, NULL::float8 AS distance FROM messages WHERE content ILIKE ",
        );
        qb.push_bind(pattern).push(" AND NOT (id = ANY(").push_bind(excluded_uuids).push("))");
        bind_stream_scope(&mut qb, access);
        qb.push(" ORDER BY created_at DESC LIMIT ").push_bind(limit * 2);
        qb.build_query_as().fetch_all(pool).await?
    };

    let (semantic_weight, keyword_weight) = calculate_weights(&query.text);
    let semantic_hits = rows_to_hits(&semantic_rows, |d| d.map(|d| 1.0 - d as f32).unwrap_or(0.0));
    let keyword_hits = rows_to_hits(&keyword_rows, |_| 1.0);

    let mut ranked = hybrid_rank(semantic_hits, keyword_hits.clone(), semantic_weight, keyword_weight, limit as usize);
    if ranked.is_empty() && !keyword_hits.is_empty() {
        ranked = keyword_hits.into_iter().take(limit as usize).collect();
    }

    expand_and_enrich(pool, ranked).await
}

fn rows_to_hits(rows: &[MessageRow], score_from_distance: impl Fn(Option<f64>) -> f32) -> Vec<MessageHit> {
    rows.iter()
        .map(|r| MessageHit {
            message_id: MessageId::from_uuid(r.message_id),
            stream_id: StreamId::from_uuid(r.stream_id),
            content: r.content.clone(),
            score: score_from_distance(r.distance),
            author_name: None,
            stream_name: None,
        })
        .collect()
}

/// For the top 3 ranked hits, pull in the message immediately before and
/// after it in the same stream. For the top 2 distinct streams among the
/// ranked hits, pull in that stream's 5 most recent messages. Dedup by id,
/// then enrich every resulting hit with author/stream display names.
async fn expand_and_enrich(pool: &PgPool, ranked: Vec<MessageHit>) -> Result<Vec<MessageHit>> {
    let mut seen: HashSet<MessageId> = ranked.iter().map(|h| h.message_id).collect();
    let mut all_hits = ranked.clone();

    for hit in ranked.iter().take(3) {
        for neighbor in fetch_neighbor_messages(pool, hit.message_id, hit.stream_id).await? {
            if seen.insert(neighbor.message_id) {
                all_hits.push(neighbor);
            }
        }
    }

    let mut top_streams: Vec<StreamId> = Vec::new();
    for hit in ranked.iter() {
        if top_streams.len() >= 2 {
            break;
        }
        if !top_streams.contains(&hit.stream_id) {
            top_streams.push(hit.stream_id);
        }
    }
    for stream_id in top_streams {
        for recent in fetch_recent_messages(pool, stream_id, 5).await? {
            if seen.insert(recent.message_id) {
                all_hits.push(recent);
            }
        }
    }

    enrich_authors_and_streams(pool, &mut all_hits).await?;
    Ok(all_hits)
}

async fn fetch_neighbor_messages(pool: &PgPool, message_id: MessageId, stream_id: StreamId) -> Result<Vec<MessageHit>> {
    let rows: Vec<MessageRow> = sqlx::query_as(
        r#"
        (SELECT id AS message_id, stream_id, content, NULL::float8 AS distance
         FROM messages
         WHERE stream_id = $1 AND created_at < (SELECT created_at FROM messages WHERE id = $2)
         ORDER BY created_at DESC LIMIT 1)
        UNION ALL
        (SELECT id AS message_id, stream_id, content, NULL::float8 AS distance
         FROM messages
         WHERE stream_id = $1 AND created_at > (SELECT created_at FROM messages WHERE id = $2)
         ORDER BY created_at ASC LIMIT 1)
        "#,
    )
    .bind(stream_id.into_uuid())
    .bind(message_id.into_uuid())
    .fetch_all(pool)
    .await?;

    Ok(rows_to_hits(&rows, |_| 0.0))
}

async fn fetch_recent_messages(pool: &PgPool, stream_id: StreamId, count: i64) -> Result<Vec<MessageHit>> {
    let rows: Vec<MessageRow> = sqlx::query_as(
        "SELECT id AS message_id, stream_id, content, NULL::float8 AS distance FROM messages WHERE stream_id = $1 ORDER BY created_at DESC LIMIT $2",
    )
    .bind(stream_id.into_uuid())
    .bind(count)
    .fetch_all(pool)
    .await?;

    Ok(rows_to_hits(&rows, |_| 0.0))
}

/// Joins author display names from `actors` and, standing in for a "stream
/// display name" (streams carry none of their own), the name of the
/// stream's currently open conversation.
async fn enrich_authors_and_streams(pool: &PgPool, hits: &mut [MessageHit]) -> Result<()> {
    if hits.is_empty() {
        return Ok(());
    }

    let message_ids: Vec<uuid::Uuid> = hits.iter().map(|h| h.message_id.into_uuid()).collect();
    let author_rows: Vec<(uuid::Uuid, String)> = sqlx::query_as(
        "SELECT m.id, a.display_name FROM messages m JOIN actors a ON a.id = m.author_id WHERE m.id = ANY($1)",
    )
    .bind(&message_ids)
    .fetch_all(pool)
    .await?;
    let author_by_message: HashMap<uuid::Uuid, String> = author_rows.into_iter().collect();

    let stream_ids: Vec<uuid::Uuid> = hits.iter().map(|h| h.stream_id.into_uuid()).collect();
    let stream_rows: Vec<(uuid::Uuid, String)> = sqlx::query_as(
        "SELECT DISTINCT ON (stream_id) stream_id, name
         FROM conversations
         WHERE stream_id = ANY($1) AND resolved_at IS NULL AND name IS NOT NULL
         ORDER BY stream_id, updated_at DESC",
    )
    .bind(&stream_ids)
    .fetch_all(pool)
    .await?;
    let name_by_stream: HashMap<uuid::Uuid, String> = stream_rows.into_iter().collect();

    for hit in hits.iter_mut() {
        hit.author_name = author_by_message.get(&hit.message_id.into_uuid()).cloned();
        hit.stream_name = name_by_stream.get(&hit.stream_id.into_uuid()).cloned();
    }
    Ok(())
}

/// Boost the keyword weight when the query text looks like it contains
/// specific terms a vector search tends to blur (quoted phrases, numerals,
/// identifiers), mirroring the source recall pipeline's weighting.
fn calculate_weights(query_text: &str) -> (f32, f32) {
    if super::has_specific_terms(query_text) {
        (0.2, 0.8)
    } else {
        (0.6, 0.4)
    }
}

/// Reciprocal rank fusion: `score = weight / (K + rank + 1)` per list,
/// summed across lists by message id, then sorted descending.
pub fn hybrid_rank(
    semantic_hits: Vec<MessageHit>,
    keyword_hits: Vec<MessageHit>,
    semantic_weight: f32,
    keyword_weight: f32,
    limit: usize,
) -> Vec<MessageHit> {
    let mut fused: HashMap<MessageId, (f32, MessageHit)> = HashMap::new();

    for (rank, hit) in semantic_hits.into_iter().enumerate() {
        let rrf = semantic_weight / (RRF_K + rank as f32 + 1.0);
        fused
            .entry(hit.message_id)
            .and_modify(|(score, _)| *score += rrf)
            .or_insert((rrf, hit));
    }
    for (rank, hit) in keyword_hits.into_iter().enumerate() {
        let rrf = keyword_weight / (RRF_K + rank as f32 + 1.0);
        fused
            .entry(hit.message_id)
            .and_modify(|(score, _)| *score += rrf)
            .or_insert((rrf, hit));
    }

    let mut ranked: Vec<MessageHit> = fused
        .into_values()
        .map(|(score, mut hit)| {
            hit.score = score;
            hit
        })
        .collect();
    ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    ranked.truncate(limit);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::entity_ids::{MessageId, StreamId};

    fn hit(n: u8) -> MessageHit {
        MessageHit {
            message_id: MessageId::from_uuid(uuid::Uuid::from_u128(n as u128)),
            stream_id: StreamId::from_uuid(uuid::Uuid::nil()),
            content: format!("message {n}"),
            score: 0.0,
            author_name: None,
            stream_name: None,
        }
    }

    #[test]
    fn hybrid_rank_favors_hits_appearing_in_both_lists() {
        let semantic = vec![hit(1), hit(2), hit(3)];
        let keyword = vec![hit(2), hit(4)];
        let ranked = hybrid_rank(semantic, keyword, 0.6, 0.4, 10);
        assert_eq!(ranked[0].message_id, MessageId::from_uuid(uuid::Uuid::from_u128(2)));
    }

    #[test]
    fn hybrid_rank_respects_limit() {
        let semantic = (1..=10).map(hit).collect();
        let ranked = hybrid_rank(semantic, Vec::new(), 0.6, 0.4, 3);
        assert_eq!(ranked.len(), 3);
    }

    #[test]
    fn calculate_weights_boosts_keyword_for_specific_terms() {
        let (sem, kw) = calculate_weights("the \"exact phrase\" here");
        assert!(kw > sem);
    }
}
