//! Retrieval Loop: given a trigger message, decide what context to pull
//! (memos, prior messages, attachments), execute those searches, judge
//! whether the results are sufficient, and either run another round or
//! finalize a context blob for the companion-response worker.
//!
//! The loop is a plain enum state machine rather than a generic FSM type —
//! `DECIDE -> EXECUTE -> EVALUATE -> (EXECUTE | FINALIZE)` — driven by a
//! bounded `for` loop rather than recursion, since every step can fail and
//! every failure needs to fall back to the deterministic baseline query set
//! rather than propagate.

mod baseline;
mod cache;
mod execution;

pub use baseline::{derive_baseline_queries, has_specific_terms};
pub use cache::{CachedRetrieval, get_cached, store_cached};
pub use execution::{execute_query, hybrid_rank};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::PgPool;
use tracing::{info, warn};

use crate::common::entity_ids::{ActorId, AttachmentId, MemoId, MessageId, SessionId, StreamId, WorkspaceId};
use crate::config::RetrievalConfig;
use crate::kernel::InterceptedAi;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryTarget {
    Memos,
    Messages,
    Attachments,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    Semantic,
    Exact,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalQuery {
    pub target: QueryTarget,
    pub query_type: QueryType,
    pub text: String,
}

/// Which streams a search may read from. `MemberUnion` covers a
/// direct-message conversation: any stream any of the named actors belongs
/// to. `StreamIds` is used once a prior round has narrowed the set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AccessSpec {
    AllStreams,
    MemberUnion(Vec<ActorId>),
    StreamIds(Vec<StreamId>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoHit {
    pub memo_id: MemoId,
    pub stream_id: StreamId,
    pub content: String,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageHit {
    pub message_id: MessageId,
    pub stream_id: StreamId,
    pub content: String,
    pub score: f32,
    /// Display name of the message's author, joined in during search.
    pub author_name: Option<String>,
    /// Display name of the open conversation this message's stream is
    /// currently tracking, standing in for a "stream name" since streams
    /// themselves carry no display name of their own.
    pub stream_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentHit {
    pub attachment_id: AttachmentId,
    pub stream_id: StreamId,
    pub caption: String,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerMessage {
    pub id: MessageId,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalInput {
    pub workspace_id: WorkspaceId,
    pub session_id: SessionId,
    pub stream_id: StreamId,
    pub trigger_message: TriggerMessage,
    pub conversation_history: Vec<String>,
    pub actor_id: ActorId,
    pub dm_participant_ids: Option<Vec<ActorId>>,
}

impl RetrievalInput {
    fn access_spec(&self) -> AccessSpec {
        match &self.dm_participant_ids {
            Some(ids) if !ids.is_empty() => AccessSpec::MemberUnion(ids.clone()),
            _ => AccessSpec::StreamIds(vec![self.stream_id]),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub retrieved_context: String,
    pub memos: Vec<MemoHit>,
    pub messages: Vec<MessageHit>,
    pub attachments: Vec<AttachmentHit>,
    pub searches_performed: Vec<RetrievalQuery>,
}

impl RetrievalResult {
    fn render_context(&mut self) {
        let mut sections = Vec::new();
        if !self.memos.is_empty() {
            let body = self.memos.iter().map(|m| format!("- {}", m.content)).collect::<Vec<_>>().join("\n");
            sections.push(format!("## Known context\n{body}"));
        }
        if !self.messages.is_empty() {
            let body = self.messages.iter().map(|m| format!("- {}", m.content)).collect::<Vec<_>>().join("\n");
            sections.push(format!("## Related prior messages\n{body}"));
        }
        if !self.attachments.is_empty() {
            let body = self.attachments.iter().map(|a| format!("- {}", a.caption)).collect::<Vec<_>>().join("\n");
            sections.push(format!("## Related attachments\n{body}"));
        }
        self.retrieved_context = sections.join("\n\n");
    }
}

enum RetrievalState {
    Decide,
    Execute(Vec<RetrievalQuery>),
    Evaluate,
    Finalize,
}

/// What EVALUATE decided: either the accumulated context is enough, or
/// another round of searches is pending.
enum Judgement {
    Sufficient,
    Continue(Vec<RetrievalQuery>),
}

/// Run the retrieval loop for a trigger message, consulting the
/// write-through cache first and falling back to the deterministic
/// baseline queries whenever a planning or evaluation call fails.
pub async fn run_retrieval_loop(
    pool: &PgPool,
    ai: &InterceptedAi,
    config: &RetrievalConfig,
    input: &RetrievalInput,
) -> Result<RetrievalResult> {
    if let Some(cached) = get_cached(pool, input.trigger_message.id).await? {
        info!(message_id = %input.trigger_message.id, "retrieval cache hit");
        return Ok(cached.result);
    }

    let access = input.access_spec();
    let mut result = RetrievalResult::default();
    let mut state = RetrievalState::Decide;
    let mut iterations = 0u32;
    let excluded = vec![input.trigger_message.id];

    loop {
        if iterations >= config.max_iterations {
            state = RetrievalState::Finalize;
        }

        state = match state {
            RetrievalState::Decide => {
                let queries = decide_queries(ai, input).await;
                if queries.is_empty() {
                    RetrievalState::Finalize
                } else {
                    RetrievalState::Execute(queries)
                }
            }
            RetrievalState::Execute(queries) => {
                for query in queries {
                    match execute_query(
                        pool,
                        ai,
                        input.workspace_id,
                        input.session_id,
                        &access,
                        &query,
                        config.max_results_per_search,
                        config.semantic_distance_threshold,
                        &excluded,
                    )
                    .await
                    {
                        Ok(hits) => apply_hits(&mut result, hits),
                        Err(err) => warn!(error = %err, target = ?query.target, "retrieval query failed, skipping"),
                    }
                    result.searches_performed.push(query);
                }
                iterations += 1;
                RetrievalState::Evaluate
            }
            RetrievalState::Evaluate => match evaluate(ai, input, &result).await {
                Judgement::Sufficient => RetrievalState::Finalize,
                Judgement::Continue(queries) if iterations < config.max_iterations => RetrievalState::Execute(queries),
                Judgement::Continue(_) => RetrievalState::Finalize,
            },
            RetrievalState::Finalize => break,
        };
    }

    result.render_context();
    store_cached(pool, input.workspace_id, input.trigger_message.id, &result).await?;
    Ok(result)
}

/// Merge results into the accumulators, deduping by id so a hit returned by
/// more than one query (or more than one round) is only kept once.
fn apply_hits(result: &mut RetrievalResult, hits: execution::QueryHits) {
    match hits {
        execution::QueryHits::Memos(memos) => {
            for memo in memos {
                if !result.memos.iter().any(|m| m.memo_id == memo.memo_id) {
                    result.memos.push(memo);
                }
            }
        }
        execution::QueryHits::Messages(messages) => {
            for message in messages {
                if !result.messages.iter().any(|m| m.message_id == message.message_id) {
                    result.messages.push(message);
                }
            }
        }
        execution::QueryHits::Attachments(attachments) => {
            for attachment in attachments {
                if !result.attachments.iter().any(|a| a.attachment_id == attachment.attachment_id) {
                    result.attachments.push(attachment);
                }
            }
        }
    }
}

/// Dedup `queries` against `derive_baseline_queries(trigger_text)` on
/// `(target, query_type, text)` and append whichever baseline queries
/// aren't already covered.
fn merge_baseline(queries: Vec<RetrievalQuery>, trigger_text: &str) -> Vec<RetrievalQuery> {
    let mut seen: std::collections::HashSet<(QueryTarget, QueryType, String)> =
        queries.iter().map(|q| (q.target, q.query_type, q.text.clone())).collect();

    let mut merged = queries;
    for baseline in derive_baseline_queries(trigger_text) {
        if seen.insert((baseline.target, baseline.query_type, baseline.text.clone())) {
            merged.push(baseline);
        }
    }
    merged
}

fn query_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "target": {"type": "string", "enum": ["memos", "messages", "attachments"]},
            "query_type": {"type": "string", "enum": ["semantic", "exact"]},
            "text": {"type": "string"}
        },
        "required": ["target", "query_type", "text"]
    })
}

/// DECIDE: always ask the model to plan the first round of searches.
/// Baseline queries are the fallback path, not the default one — they're
/// used only when the call errors, the response doesn't parse, or the
/// model says search is needed but names no queries.
async fn decide_queries(ai: &InterceptedAi, input: &RetrievalInput) -> Vec<RetrievalQuery> {
    let schema = json!({
        "type": "object",
        "properties": {
            "needs_search": {"type": "boolean"},
            "reasoning": {"type": "string"},
            "queries": {"type": "array", "items": query_schema()}
        },
        "required": ["needs_search", "reasoning", "queries"]
    });

    let system = "Decide whether this trigger message needs additional retrieved context, and if so, what searches would help. Set needs_search to false and return an empty queries list if nothing more is needed.";
    let prompt = format!(
        "Trigger message: {}\nConversation so far: {}",
        input.trigger_message.text,
        input.conversation_history.join(" / "),
    );

    let decision = match ai
        .generate_object(input.workspace_id, input.session_id, system, &prompt, &schema, "claude-3-5-haiku-latest")
        .await
    {
        Ok(value) => match serde_json::from_value::<DecidedQueries>(value) {
            Ok(decision) => Some(decision),
            Err(err) => {
                warn!(error = %err, "retrieval planning response did not match the expected shape, falling back to baseline");
                None
            }
        },
        Err(err) => {
            warn!(error = %err, "retrieval planning call failed, falling back to baseline");
            None
        }
    };

    match decision {
        Some(d) if !d.needs_search => Vec::new(),
        Some(d) if !d.queries.is_empty() => merge_baseline(d.queries, &input.trigger_message.text),
        _ => derive_baseline_queries(&input.trigger_message.text),
    }
}

#[derive(Debug, Deserialize)]
struct DecidedQueries {
    needs_search: bool,
    #[allow(dead_code)]
    reasoning: String,
    queries: Vec<RetrievalQuery>,
}

/// EVALUATE: ask the model in one call whether the accumulated context is
/// sufficient and, if not, what additional queries to run next. Looping
/// back through DECIDE here would double the per-round model-call count,
/// so a "continue" judgement goes straight back to EXECUTE.
async fn evaluate(ai: &InterceptedAi, input: &RetrievalInput, result: &RetrievalResult) -> Judgement {
    let schema = json!({
        "type": "object",
        "properties": {
            "sufficient": {"type": "boolean"},
            "reasoning": {"type": "string"},
            "additional_queries": {
                "anyOf": [
                    {"type": "array", "items": query_schema()},
                    {"type": "null"}
                ]
            }
        },
        "required": ["sufficient", "reasoning"]
    });
    let system = "Judge whether the retrieved context is sufficient to respond to the trigger message. If not, suggest additional searches as additional_queries.";
    let prompt = format!(
        "Trigger message: {}\nRetrieved memos: {}\nRetrieved messages: {}\nRetrieved attachments: {}",
        input.trigger_message.text,
        result.memos.len(),
        result.messages.len(),
        result.attachments.len()
    );

    match ai.generate_object(input.workspace_id, input.session_id, system, &prompt, &schema, "claude-3-5-haiku-latest").await {
        Ok(value) => match serde_json::from_value::<Evaluation>(value) {
            Ok(eval) => {
                let additional = eval.additional_queries.unwrap_or_default();
                if eval.sufficient || additional.is_empty() {
                    Judgement::Sufficient
                } else {
                    Judgement::Continue(additional)
                }
            }
            Err(err) => {
                warn!(error = %err, "retrieval evaluation response did not match the expected shape");
                evaluate_fallback(result, &input.trigger_message.text)
            }
        },
        Err(err) => {
            warn!(error = %err, "retrieval evaluation call failed");
            evaluate_fallback(result, &input.trigger_message.text)
        }
    }
}

/// Used when the evaluation call itself is unusable. If nothing has been
/// found yet, retry with the deterministic baseline queries rather than
/// finalizing on an empty result; otherwise treat what's accumulated so far
/// as sufficient rather than looping further on a call that keeps failing.
fn evaluate_fallback(result: &RetrievalResult, trigger_text: &str) -> Judgement {
    if result.memos.is_empty() && result.messages.is_empty() && result.attachments.is_empty() {
        Judgement::Continue(derive_baseline_queries(trigger_text))
    } else {
        Judgement::Sufficient
    }
}

#[derive(Debug, Deserialize)]
struct Evaluation {
    sufficient: bool,
    #[allow(dead_code)]
    reasoning: String,
    #[serde(default)]
    additional_queries: Option<Vec<RetrievalQuery>>,
}
