/// Conversation-context enrichment for short or ambiguous follow-up questions.
///
/// "What about its prerequisites?" says nothing on its own; the academic terms
/// mentioned in the last few turns are appended as `(context: ...)` so routing and
/// retrieval see them.

use std::sync::LazyLock;

use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config::AliasConfig;
use crate::search::extract_course_codes;

const AMBIGUOUS_REFERENTS: &[&str] = &["it", "that", "them", "this", "those", "these", "they", "its"];

static DEGREE_NOUN_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(major|minor|degree|concentration|emphasis|bachelor'?s|b\.?s\.?|b\.?a\.?)\b").ok()
});

static CLASS_YEAR_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(freshman|sophomore|junior|senior|first[- ]year|second[- ]year|third[- ]year|fourth[- ]year)\b").ok()
});

/// One prior message in the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ConversationTurn {
    /// "user" or "assistant"
    #[serde(default = "default_role")]
    pub role: String,
    pub content: String,
}

fn default_role() -> String {
    "user".to_string()
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        ConversationTurn {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        ConversationTurn {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Whether `query` is short enough or vague enough to need prior context.
pub fn needs_context(query: &str, short_query_tokens: usize) -> bool {
    let words: Vec<String> = query
        .split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
        .collect();
    words.len() <= short_query_tokens
        || words.iter().any(|w| AMBIGUOUS_REFERENTS.contains(&w.as_str()))
}

fn push_unique(terms: &mut Vec<String>, term: String) {
    if !terms.iter().any(|t| t.eq_ignore_ascii_case(&term)) {
        terms.push(term);
    }
}

/// Academic terms found in `turns`: course codes, program names and degree nouns,
/// class-year nouns. Order of first appearance.
pub fn extract_context_terms(turns: &[ConversationTurn], aliases: &AliasConfig) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for turn in turns {
        let text = turn.content.as_str();
        let lower = text.to_lowercase();

        for code in extract_course_codes(text) {
            push_unique(&mut terms, code);
        }
        // Multi-word program names only; two-letter abbreviations are too noisy here
        for name in aliases.programs.keys().filter(|n| n.contains(' ')) {
            if lower.contains(name.as_str()) {
                push_unique(&mut terms, name.clone());
            }
        }
        for re in [&*DEGREE_NOUN_RE, &*CLASS_YEAR_RE].into_iter().flatten() {
            for m in re.find_iter(text) {
                push_unique(&mut terms, m.as_str().to_lowercase());
            }
        }
    }
    terms
}

/// Append context terms from the last `turns` turns when the query needs them.
/// Returns the query unchanged otherwise.
pub fn enrich_query(
    query: &str,
    history: &[ConversationTurn],
    turns: usize,
    short_query_tokens: usize,
    aliases: &AliasConfig,
) -> String {
    if history.is_empty() || turns == 0 || !needs_context(query, short_query_tokens) {
        return query.to_string();
    }
    let recent = &history[history.len().saturating_sub(turns)..];
    let query_lower = query.to_lowercase();
    let terms: Vec<String> = extract_context_terms(recent, aliases)
        .into_iter()
        .filter(|t| !query_lower.contains(t.as_str()))
        .collect();
    if terms.is_empty() {
        return query.to_string();
    }
    format!("{} (context: {})", query.trim_end(), terms.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_needs_context() {
        assert!(needs_context("prerequisites?", 4));
        assert!(needs_context("What are the prerequisites for it?", 4));
        assert!(needs_context("Can you tell me more about those classes please", 4));
        assert!(!needs_context("What are the graduation requirements for computer science", 4));
    }

    #[test]
    fn test_enrich_appends_terms_from_recent_turns() {
        let history = vec![
            ConversationTurn::user("I'm a sophomore in the computer science major"),
            ConversationTurn::assistant("CPSC 350 covers data structures."),
        ];
        let enriched = enrich_query("what are its prereqs?", &history, 3, 4, &AliasConfig::default());
        assert_eq!(
            enriched,
            "what are its prereqs? (context: computer science, major, sophomore, cpsc350)"
        );
    }

    #[test]
    fn test_enrich_only_looks_at_last_turns() {
        let history = vec![
            ConversationTurn::user("Tell me about MATH 250"),
            ConversationTurn::user("ok"),
            ConversationTurn::user("thanks"),
            ConversationTurn::user("and the minor?"),
        ];
        let enriched = enrich_query("and that one?", &history, 3, 4, &AliasConfig::default());
        assert_eq!(enriched, "and that one? (context: minor)");
    }

    #[test]
    fn test_enrich_leaves_clear_queries_alone() {
        let history = vec![ConversationTurn::user("CPSC 350")];
        let query = "What are the graduation requirements for computer science students";
        assert_eq!(enrich_query(query, &history, 3, 4, &AliasConfig::default()), query);
    }

    #[test]
    fn test_enrich_without_history_or_terms() {
        assert_eq!(enrich_query("it?", &[], 3, 4, &AliasConfig::default()), "it?");
        let history = vec![ConversationTurn::user("hello")];
        assert_eq!(enrich_query("it?", &history, 3, 4, &AliasConfig::default()), "it?");
    }
}
