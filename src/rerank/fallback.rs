/// Lexical relevance used when the cross-encoder is unavailable.

use std::collections::HashSet;

const ACADEMIC_TERMS: &[&str] = &[
    "requirement", "prerequisite", "course", "credit", "gpa", "degree", "major", "minor",
    "graduation", "semester",
];

const PHRASE_BOOST: f64 = 0.3;
const TERM_BOOST: f64 = 0.1;
const MAX_TERM_BOOST: f64 = 0.2;

/// Jaccard overlap of lowercase whitespace tokens, plus a boost when the whole query
/// appears verbatim in the text and a capped boost for shared academic terms.
/// Always in `[0, 1]`.
pub fn lexical_score(query: &str, text: &str) -> f64 {
    let query_lower = query.to_lowercase();
    let text_lower = text.to_lowercase();
    let query_words: HashSet<&str> = query_lower.split_whitespace().collect();
    if query_words.is_empty() {
        return 0.0;
    }
    let text_words: HashSet<&str> = text_lower.split_whitespace().collect();

    let intersection = query_words.intersection(&text_words).count();
    let union = query_words.union(&text_words).count();
    let jaccard = intersection as f64 / union as f64;

    let phrase = if text_lower.contains(query_lower.trim()) {
        PHRASE_BOOST
    } else {
        0.0
    };

    let shared_terms = ACADEMIC_TERMS
        .iter()
        .filter(|t| query_lower.contains(*t) && text_lower.contains(*t))
        .count();
    let terms = (shared_terms as f64 * TERM_BOOST).min(MAX_TERM_BOOST);

    (jaccard + phrase + terms).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_text_scores_one() {
        assert_eq!(lexical_score("major requirements", "major requirements"), 1.0);
    }

    #[test]
    fn test_components_add_up() {
        // jaccard 2/6, verbatim phrase +0.3, shared "minor" +0.1
        let score = lexical_score("cs minor", "The CS minor needs six courses");
        assert!((score - (2.0 / 6.0 + 0.3 + 0.1)).abs() < 1e-9);
    }

    #[test]
    fn test_academic_boost_is_capped() {
        let query = "degree major minor credit";
        let text = "credit minor major degree rules xyz";
        // jaccard 4/6, no phrase, four shared terms capped at 0.2
        assert!((lexical_score(query, text) - (4.0 / 6.0 + 0.2)).abs() < 1e-9);
    }

    #[test]
    fn test_empty_query_and_unrelated_text() {
        assert_eq!(lexical_score("", "anything"), 0.0);
        assert_eq!(lexical_score("parking permit", "calculus sequence"), 0.0);
    }
}
