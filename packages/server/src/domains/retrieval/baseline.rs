//! Deterministic fallback queries derived from the trigger message, used
//! when the planning call fails or returns no queries. Reuses the same
//! `has_specific_terms` heuristic the source recall pipeline uses for
//! semantic/keyword weighting, here driving which query variants to emit.

use super::{QueryTarget, QueryType, RetrievalQuery};

/// Does this text contain quoted phrases, numerals, proper-noun-looking
/// tokens, or kebab/snake_case identifiers — signals that an exact/keyword
/// search is likely to help alongside a semantic one.
pub fn has_specific_terms(text: &str) -> bool {
    let words: Vec<&str> = text.split_whitespace().collect();

    if text.contains('"') {
        return true;
    }
    if words.iter().any(|w| w.chars().any(|c| c.is_numeric())) {
        return true;
    }
    if words.iter().skip(1).any(|w| w.chars().next().map(char::is_uppercase).unwrap_or(false)) {
        return true;
    }
    if words.iter().any(|w| w.contains('-') || w.contains('_')) {
        return true;
    }

    false
}

/// Deterministic, ordered baseline queries derived from the trigger message
/// text: a semantic query over memos and messages, plus an exact query when
/// the text looks like it contains specific terms.
pub fn derive_baseline_queries(trigger_text: &str) -> Vec<RetrievalQuery> {
    let trimmed = trigger_text.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    let mut queries = vec![
        RetrievalQuery {
            target: QueryTarget::Messages,
            query_type: QueryType::Semantic,
            text: trimmed.to_string(),
        },
        RetrievalQuery {
            target: QueryTarget::Memos,
            query_type: QueryType::Semantic,
            text: trimmed.to_string(),
        },
    ];

    if has_specific_terms(trimmed) {
        queries.push(RetrievalQuery {
            target: QueryTarget::Messages,
            query_type: QueryType::Exact,
            text: trimmed.to_string(),
        });
        queries.push(RetrievalQuery {
            target: QueryTarget::Memos,
            query_type: QueryType::Exact,
            text: trimmed.to_string(),
        });
    }

    queries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_quoted_phrases_and_numerals() {
        assert!(has_specific_terms("the \"Q3 budget\" doc"));
        assert!(has_specific_terms("meeting on 2026-01-15"));
        assert!(!has_specific_terms("find volunteer opportunities"));
    }

    #[test]
    fn baseline_queries_include_exact_variants_for_specific_terms() {
        let queries = derive_baseline_queries("look at user-profile-page again");
        assert!(queries.iter().any(|q| q.query_type == QueryType::Exact));
    }

    #[test]
    fn empty_trigger_text_yields_no_queries() {
        assert!(derive_baseline_queries("   ").is_empty());
    }
}
