/// Collection kinds: the tagged variant behind every per-collection decision.
///
/// Collection names are configuration (see `CollectionsConfig`); everything that
/// branches on "which collection is this" branches on `CollectionKind` instead.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionKind {
    MajorCatalog,
    MinorCatalog,
    YearPlan,
    GeneralKnowledge,
    CourseListing,
}

/// Broad grouping used by the weighted reranker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionCategory {
    Catalog,
    Listing,
    General,
}

impl CollectionKind {
    /// Catalog order; also the tie-break order for keyword routing.
    pub const ALL: [CollectionKind; 5] = [
        CollectionKind::MajorCatalog,
        CollectionKind::YearPlan,
        CollectionKind::MinorCatalog,
        CollectionKind::GeneralKnowledge,
        CollectionKind::CourseListing,
    ];

    pub fn category(self) -> CollectionCategory {
        match self {
            CollectionKind::MajorCatalog
            | CollectionKind::MinorCatalog
            | CollectionKind::YearPlan => CollectionCategory::Catalog,
            CollectionKind::CourseListing => CollectionCategory::Listing,
            CollectionKind::GeneralKnowledge => CollectionCategory::General,
        }
    }

    /// One-line description shown to the LLM router and in the MCP catalog resource.
    pub fn description(self) -> &'static str {
        match self {
            CollectionKind::MajorCatalog => {
                "Degree requirements, course prerequisites, graduation requirements"
            }
            CollectionKind::MinorCatalog => "Minor program requirements and course lists",
            CollectionKind::YearPlan => {
                "Semester course sequences, recommended schedules by year"
            }
            CollectionKind::GeneralKnowledge => {
                "Registration, policies, deadlines, academic procedures"
            }
            CollectionKind::CourseListing => "Course descriptions, units, and offerings",
        }
    }
}

impl fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectionKind::MajorCatalog => write!(f, "major_catalog"),
            CollectionKind::MinorCatalog => write!(f, "minor_catalog"),
            CollectionKind::YearPlan => write!(f, "year_plan"),
            CollectionKind::GeneralKnowledge => write!(f, "general_knowledge"),
            CollectionKind::CourseListing => write!(f, "course_listing"),
        }
    }
}
