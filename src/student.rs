/// Student context supplied by the caller and alias resolution to canonical codes.

use std::sync::LazyLock;

use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config::AliasConfig;

static YEAR_RE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\b(20\d{2})\b").ok());

/// What the caller knows about the student. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct StudentContext {
    /// Major program, as a name or abbreviation (e.g. "Computer Science", "cs")
    #[serde(default)]
    pub program: Option<String>,
    /// Catalog year (e.g. "2024")
    #[serde(default)]
    pub catalog_year: Option<String>,
    /// Declared minor, as a name or abbreviation
    #[serde(default)]
    pub minor: Option<String>,
}

impl StudentContext {
    pub fn new(program: Option<&str>, catalog_year: Option<&str>, minor: Option<&str>) -> Self {
        StudentContext {
            program: program.map(String::from),
            catalog_year: catalog_year.map(String::from),
            minor: minor.map(String::from),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.program.is_none() && self.catalog_year.is_none() && self.minor.is_none()
    }

    pub fn has_minor(&self) -> bool {
        self.minor.as_deref().map(|m| !m.trim().is_empty()).unwrap_or(false)
    }

    /// Canonical subject code for the declared program.
    pub fn program_code(&self, aliases: &AliasConfig) -> Option<String> {
        self.program.as_deref().and_then(|p| resolve(&aliases.programs, p))
    }

    /// Canonical code for the declared minor.
    pub fn minor_code(&self, aliases: &AliasConfig) -> Option<String> {
        self.minor.as_deref().and_then(|m| resolve(&aliases.minors, m))
    }

    /// Four-digit catalog year, tolerating inputs like "Fall 2024" or "catalog year: 2023".
    pub fn year(&self) -> Option<String> {
        let raw = self.catalog_year.as_deref()?;
        let re = YEAR_RE.as_ref()?;
        re.captures(raw).map(|caps| caps[1].to_string())
    }
}

fn resolve(table: &std::collections::BTreeMap<String, String>, raw: &str) -> Option<String> {
    let normalized = raw.trim().to_lowercase();
    if normalized.is_empty() {
        return None;
    }
    if let Some(code) = table.get(&normalized) {
        return Some(code.clone());
    }
    // Unknown names pass through so filters still apply to codes we have no alias for
    Some(normalized)
}

/// Every alias (including the code itself) that maps to program `code`.
pub fn program_aliases(aliases: &AliasConfig, code: &str) -> Vec<String> {
    let code = code.to_lowercase();
    let mut names: Vec<String> = vec![code.clone()];
    for (alias, target) in &aliases.programs {
        if *target == code && !names.contains(alias) {
            names.push(alias.clone());
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_program_alias_resolution() {
        let aliases = AliasConfig::default();
        let student = StudentContext::new(Some("Computer Science"), None, None);
        assert_eq!(student.program_code(&aliases).as_deref(), Some("cs"));
        let student = StudentContext::new(Some(" CS "), None, None);
        assert_eq!(student.program_code(&aliases).as_deref(), Some("cs"));
        let student = StudentContext::new(Some("Physics"), None, None);
        assert_eq!(student.program_code(&aliases).as_deref(), Some("physics"));
        assert_eq!(StudentContext::default().program_code(&aliases), None);
    }

    #[test]
    fn test_minor_resolution_and_presence() {
        let aliases = AliasConfig::default();
        let student = StudentContext::new(None, None, Some("Data Analytics"));
        assert!(student.has_minor());
        assert_eq!(student.minor_code(&aliases).as_deref(), Some("analytics"));
        assert!(!StudentContext::new(None, None, Some("  ")).has_minor());
    }

    #[test]
    fn test_year_extraction() {
        assert_eq!(StudentContext::new(None, Some("2024"), None).year().as_deref(), Some("2024"));
        assert_eq!(StudentContext::new(None, Some("Fall 2023"), None).year().as_deref(), Some("2023"));
        assert_eq!(StudentContext::new(None, Some("next year"), None).year(), None);
    }

    #[test]
    fn test_program_aliases_include_code_first() {
        let aliases = program_aliases(&AliasConfig::default(), "cs");
        assert_eq!(aliases[0], "cs");
        assert!(aliases.contains(&"computer science".to_string()));
        assert!(aliases.contains(&"cpsc".to_string()));
        assert!(!aliases.contains(&"data science".to_string()));
    }
}
