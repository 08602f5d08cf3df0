/// Rule-based collection scoring.
///
/// Each collection kind has a list of keyword phrases (+2 per hit) and regex
/// patterns (+3 per hit). Keywords match on word boundaries, so "cs" does not fire
/// inside "physics".

use std::sync::LazyLock;

use regex::Regex;

use crate::collection::CollectionKind;
use crate::search::extract_course_codes;

pub(crate) const KEYWORD_POINTS: u32 = 2;
pub(crate) const PATTERN_POINTS: u32 = 3;
/// Collections scoring below this are dropped.
pub(crate) const MIN_SCORE: u32 = 2;

struct KeywordProfile {
    kind: CollectionKind,
    keywords: &'static [&'static str],
    patterns: &'static [&'static str],
}

const PROFILES: &[KeywordProfile] = &[
    KeywordProfile {
        kind: CollectionKind::MajorCatalog,
        keywords: &[
            "major", "degree", "graduation", "requirements", "prerequisite", "curriculum",
            "program", "cs", "computer science", "engineering", "courses needed", "what courses",
            "graduate",
        ],
        patterns: &[
            r"\b(cs|ce|se|ee|ds)\b",
            r"computer\s+science",
            r"software\s+engineering",
            r"electrical\s+engineering",
            r"graduation\s+requirements",
        ],
    },
    KeywordProfile {
        kind: CollectionKind::YearPlan,
        keywords: &[
            "freshman", "sophomore", "junior", "senior", "year", "semester", "sequence",
            "schedule", "plan", "first year", "second year", "when should", "what order",
            "course sequence",
        ],
        patterns: &[
            r"\b(freshman|sophomore|junior|senior)\s+year",
            r"\b\d+\s*-?\s*year\b",
            r"first\s+year",
            r"course\s+sequence",
        ],
    },
    KeywordProfile {
        kind: CollectionKind::MinorCatalog,
        keywords: &[
            "minor", "analytics", "data science minor", "business minor", "minors available",
        ],
        patterns: &[r"\bminors?\b", r"analytics\s+minor"],
    },
    KeywordProfile {
        kind: CollectionKind::GeneralKnowledge,
        keywords: &[
            "registration", "enroll", "deadline", "policy", "gpa", "grade", "transfer", "credit",
            "academic", "advisor", "advising", "appointment", "permission", "waitlist", "drop",
            "add",
        ],
        patterns: &[
            r"registration\s+process",
            r"academic\s+policy",
            r"transfer\s+credit",
        ],
    },
    KeywordProfile {
        kind: CollectionKind::CourseListing,
        keywords: &[
            "course description", "description", "units", "offered", "offering", "instructor",
            "syllabus",
        ],
        patterns: &[r"\bdescribe\s+\w+\s*\d{2,4}"],
    },
];

static COMPILED: LazyLock<Vec<(CollectionKind, Vec<Regex>)>> = LazyLock::new(|| {
    PROFILES
        .iter()
        .map(|p| {
            let regexes = p
                .patterns
                .iter()
                .filter_map(|pat| Regex::new(&format!("(?i){}", pat)).ok())
                .collect();
            (p.kind, regexes)
        })
        .collect()
});

/// Lowercase words joined by single spaces and padded, for phrase matching.
fn padded_words(text: &str) -> String {
    let words: Vec<String> = text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(String::from)
        .collect();
    format!(" {} ", words.join(" "))
}

/// Keyword score for every collection kind, in catalog order.
pub(crate) fn score_collections(query: &str) -> Vec<(CollectionKind, u32)> {
    let padded = padded_words(query);
    let has_course_code = !extract_course_codes(query).is_empty();

    CollectionKind::ALL
        .into_iter()
        .map(|kind| {
            let mut score = 0;
            if let Some(profile) = PROFILES.iter().find(|p| p.kind == kind) {
                for keyword in profile.keywords {
                    if padded.contains(&format!(" {} ", keyword)) {
                        score += KEYWORD_POINTS;
                    }
                }
            }
            if let Some((_, regexes)) = COMPILED.iter().find(|(k, _)| *k == kind) {
                score += regexes.iter().filter(|re| re.is_match(query)).count() as u32 * PATTERN_POINTS;
            }
            if kind == CollectionKind::CourseListing && has_course_code {
                score += PATTERN_POINTS;
            }
            (kind, score)
        })
        .collect()
}

/// Kinds scoring at least `MIN_SCORE`, best first; ties keep catalog order.
pub(crate) fn rank(query: &str) -> Vec<(CollectionKind, u32)> {
    let mut scored: Vec<(CollectionKind, u32)> = score_collections(query)
        .into_iter()
        .filter(|(_, s)| *s >= MIN_SCORE)
        .collect();
    scored.sort_by(|a, b| b.1.cmp(&a.1));
    scored
}
