/// Filter relaxation policies and plan-year resolution.

use std::fmt;

use crate::chunk::Chunk;
use crate::vector_store::SearchFilter;

/// One step of a relaxation chain. Chains are tried in order; the first policy that
/// returns anything wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterPolicy {
    /// Filter pushed down to both retrieval legs
    Exact(SearchFilter),
    /// Unfiltered search over-fetched by `overfetch`, keeping chunks whose metadata or
    /// text mention any of `keywords`
    PostFilter { keywords: Vec<String>, overfetch: usize },
    Unfiltered,
}

impl FilterPolicy {
    /// `Exact` with an empty filter collapses to `Unfiltered`.
    pub fn exact(filter: SearchFilter) -> Self {
        if filter.is_empty() {
            FilterPolicy::Unfiltered
        } else {
            FilterPolicy::Exact(filter)
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FilterPolicy::Exact(_) => "exact",
            FilterPolicy::PostFilter { .. } => "post_filter",
            FilterPolicy::Unfiltered => "unfiltered",
        }
    }
}

impl fmt::Display for FilterPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterPolicy::Exact(filter) => write!(f, "exact({})", filter.describe()),
            FilterPolicy::PostFilter { keywords, .. } => {
                write!(f, "post_filter({})", keywords.join("|"))
            }
            FilterPolicy::Unfiltered => write!(f, "unfiltered"),
        }
    }
}

/// Append `policy` unless an equal one is already in the chain.
pub fn push_policy(chain: &mut Vec<FilterPolicy>, policy: FilterPolicy) {
    if !chain.contains(&policy) {
        chain.push(policy);
    }
}

fn padded_words(text: &str) -> String {
    let words: Vec<String> = text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(String::from)
        .collect();
    format!(" {} ", words.join(" "))
}

/// Whether any keyword appears as a whole word or phrase in the chunk's text or
/// metadata values.
pub fn mentions_any(chunk: &Chunk, keywords: &[String]) -> bool {
    let meta = &chunk.metadata;
    let mut haystack = String::with_capacity(chunk.text.len() + 64);
    for value in [&meta.subject_code, &meta.minor_code, &meta.source_file, &meta.section]
        .into_iter()
        .flatten()
    {
        haystack.push_str(value);
        haystack.push(' ');
    }
    for value in meta.extra.values() {
        if let Some(s) = value.as_str() {
            haystack.push_str(s);
            haystack.push(' ');
        }
    }
    haystack.push_str(&chunk.text);

    let padded = padded_words(&haystack);
    keywords
        .iter()
        .map(|k| padded_words(k))
        .filter(|k| !k.trim().is_empty())
        .any(|k| padded.contains(&k))
}

/// Pick the plan year to search: the requested year when a plan exists for it,
/// otherwise the nearest later year, otherwise the earliest available.
///
/// `None` when no year was requested or no plans exist.
pub fn resolve_plan_year(requested: Option<&str>, available: &[String]) -> Option<String> {
    let requested = requested?.trim();
    if available.is_empty() {
        return None;
    }
    if available.iter().any(|y| y == requested) {
        return Some(requested.to_string());
    }

    let mut years: Vec<(u32, &String)> = available
        .iter()
        .filter_map(|y| y.trim().parse::<u32>().ok().map(|n| (n, y)))
        .collect();
    years.sort();

    if let Ok(target) = requested.parse::<u32>() {
        if let Some((_, y)) = years.iter().find(|(n, _)| *n >= target) {
            return Some((*y).clone());
        }
    }
    years
        .first()
        .map(|(_, y)| (*y).clone())
        .or_else(|| available.iter().min().cloned())
}
