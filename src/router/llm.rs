/// LLM classifier routing: prompt construction and answer parsing.

use crate::collection::CollectionKind;
use crate::config::CollectionsConfig;
use crate::student::StudentContext;

/// Build the routing prompt.
///
/// Lists every configured collection with its description and asks for a
/// comma-separated answer of 1-3 collection names.
pub fn build_routing_prompt(query: &str, student: &StudentContext, collections: &CollectionsConfig) -> String {
    let catalog = collections
        .entries()
        .into_iter()
        .map(|(kind, name)| format!("- {}: {}", name, kind.description()))
        .collect::<Vec<_>>()
        .join("\n");
    let program = student.program.as_deref().unwrap_or("Not specified");
    let year = student.catalog_year.as_deref().unwrap_or("Not specified");
    let minor = student.minor.as_deref().unwrap_or("Not specified");
    let major = collections.name(CollectionKind::MajorCatalog);
    let plans = collections.name(CollectionKind::YearPlan);
    let minors = collections.name(CollectionKind::MinorCatalog);
    let general = collections.name(CollectionKind::GeneralKnowledge);

    format!(
        "You are a university academic routing system. Given a student query, \
         determine which knowledge collections to search.\n\n\
         Available collections:\n{catalog}\n\n\
         Student context:\n\
         - Program: {program}\n\
         - Catalog year: {year}\n\
         - Minor: {minor}\n\n\
         Query: \"{query}\"\n\n\
         Return only a comma-separated list of the most relevant 1-3 collections.\n\n\
         Examples:\n\
         \"CS major requirements\" -> {major}\n\
         \"freshman year courses\" -> {plans},{major}\n\
         \"analytics minor\" -> {minors}\n\
         \"registration deadline\" -> {general}\n\n\
         Collections:"
    )
}

/// Parse a classifier answer into known collection names, first-seen order.
///
/// Accepts commas or newlines as separators and ignores quotes, bullets, and
/// trailing punctuation. Unknown names are dropped.
pub fn parse_routing_answer(answer: &str, collections: &CollectionsConfig) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for item in answer.split([',', '\n']) {
        let cleaned = item
            .trim()
            .trim_start_matches(['-', '*', ' '])
            .trim_matches(['"', '\'', '`', '.', ' ']);
        if collections.kind(cleaned).is_some() && !out.iter().any(|c| c == cleaned) {
            out.push(cleaned.to_string());
        }
    }
    out
}
