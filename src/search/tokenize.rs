/// Lexical tokenizer shared by the sparse index and the query router.
///
/// Course codes such as "CPSC 350" or "math110a" collapse into one lowercase token
/// ("cpsc350", "math110a") before generic splitting on non-alphanumerics.

use std::sync::LazyLock;

use regex::{Captures, Regex};

static COURSE_CODE_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)\b([a-z]{2,6})\s?(\d{2,4}[a-z]?)\b").ok());

static COURSE_TOKEN_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^([a-z]{2,6})\d{2,4}[a-z]?$").ok());

/// Letter runs that precede numbers in ordinary prose ("in 2024", "fall 2023").
const NOT_A_SUBJECT: &[&str] = &[
    "a", "an", "about", "after", "and", "are", "as", "at", "be", "before", "by", "class",
    "credit", "credits", "during", "fall", "for", "from", "gpa", "grade", "have", "in", "into",
    "is", "last", "least", "level", "max", "min", "of", "on", "or", "over", "page", "plan",
    "room", "since", "spring", "summer", "take", "than", "the", "to", "top", "under", "units",
    "until", "was", "were", "winter", "with", "year", "years",
];

fn is_subject_prefix(letters: &str) -> bool {
    !NOT_A_SUBJECT.contains(&letters.to_lowercase().as_str())
}

/// Rewrite every course code in `text` to its single-token form.
pub fn normalize_course_codes(text: &str) -> String {
    let Some(re) = COURSE_CODE_RE.as_ref() else {
        return text.to_string();
    };
    re.replace_all(text, |caps: &Captures| {
        if is_subject_prefix(&caps[1]) {
            format!("{}{}", caps[1].to_lowercase(), caps[2].to_lowercase())
        } else {
            caps[0].to_string()
        }
    })
    .into_owned()
}

/// Lowercased tokens with course codes normalized.
pub fn tokenize(text: &str) -> Vec<String> {
    normalize_course_codes(text)
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}

/// Whether a normalized token looks like a course code.
pub fn is_course_code(token: &str) -> bool {
    COURSE_TOKEN_RE
        .as_ref()
        .and_then(|re| re.captures(token))
        .map(|caps| is_subject_prefix(&caps[1]))
        .unwrap_or(false)
}

/// Course codes mentioned in `text`, normalized and in order of appearance.
pub fn extract_course_codes(text: &str) -> Vec<String> {
    let mut codes: Vec<String> = Vec::new();
    for token in tokenize(text) {
        if is_course_code(&token) && !codes.contains(&token) {
            codes.push(token);
        }
    }
    codes
}
