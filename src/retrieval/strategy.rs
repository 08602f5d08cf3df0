/// Per-collection retrieval strategies.
///
/// Each collection kind owns an ordered relaxation chain of filter policies and a
/// fetch limit derived from its budget. The chain is walked until a policy returns
/// something.

use std::collections::BTreeMap;

use async_trait::async_trait;

use super::filters::{FilterPolicy, mentions_any, push_policy, resolve_plan_year};
use super::hybrid::{HybridSearcher, SearchQuery};
use crate::budget::ChunkBudget;
use crate::chunk::Chunk;
use crate::collection::CollectionKind;
use crate::config::{AliasConfig, PlansConfig};
use crate::student::{StudentContext, program_aliases};
use crate::trace::{DebugTrace, Stage};
use crate::vector_store::{FilterField, SearchFilter};

/// Student context resolved to the codes stored in chunk metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StudentFilters {
    pub program_code: Option<String>,
    pub minor_code: Option<String>,
    pub year: Option<String>,
    /// Every name the program goes by, code first
    pub program_aliases: Vec<String>,
}

impl StudentFilters {
    pub fn resolve(student: &StudentContext, aliases: &AliasConfig) -> Self {
        let program_code = student.program_code(aliases);
        let program_aliases = program_code
            .as_deref()
            .map(|code| program_aliases(aliases, code))
            .unwrap_or_default();
        StudentFilters {
            program_code,
            minor_code: student.minor_code(aliases),
            year: student.year(),
            program_aliases,
        }
    }
}

#[async_trait]
pub trait RetrievalStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Relaxation chain, strictest first.
    fn policies(&self, student: &StudentFilters) -> Vec<FilterPolicy>;

    /// How many chunks to request for `collection`.
    fn fetch_limit(&self, collection: &str, budget: &ChunkBudget) -> usize {
        budget.get(collection)
    }

    async fn search(
        &self,
        searcher: &HybridSearcher,
        query: &SearchQuery,
        collection: &str,
        student: &StudentFilters,
        budget: &ChunkBudget,
        trace: &mut DebugTrace,
    ) -> Vec<Chunk> {
        let limit = self.fetch_limit(collection, budget);
        if limit == 0 {
            return Vec::new();
        }
        let unfiltered = SearchFilter::new();

        for policy in self.policies(student) {
            let found = match &policy {
                FilterPolicy::Exact(filter) => {
                    searcher.search(query, collection, filter, limit, trace).await
                }
                FilterPolicy::Unfiltered => {
                    searcher.search(query, collection, &unfiltered, limit, trace).await
                }
                FilterPolicy::PostFilter { keywords, overfetch } => {
                    let wide = limit.saturating_mul((*overfetch).max(1));
                    searcher
                        .search(query, collection, &unfiltered, wide, trace)
                        .await
                        .into_iter()
                        .filter(|chunk| mentions_any(chunk, keywords))
                        .take(limit)
                        .collect()
                }
            };

            tracing::debug!(
                collection,
                strategy = self.name(),
                policy = %policy,
                count = found.len(),
                "Strategy step"
            );
            trace.push(
                Stage::Strategy,
                format!("{} {} {}: {} chunks", collection, self.name(), policy, found.len()),
            );
            if !found.is_empty() {
                return found;
            }
        }
        Vec::new()
    }
}

/// Major or minor catalog: filter by the program (or minor) code plus catalog year,
/// then drop every filter.
pub struct CatalogStrategy {
    field: FilterField,
}

impl CatalogStrategy {
    pub fn major() -> Self {
        CatalogStrategy { field: FilterField::Program }
    }

    pub fn minor() -> Self {
        CatalogStrategy { field: FilterField::Minor }
    }
}

#[async_trait]
impl RetrievalStrategy for CatalogStrategy {
    fn name(&self) -> &'static str {
        match self.field {
            FilterField::Minor => "minor_catalog",
            _ => "major_catalog",
        }
    }

    fn policies(&self, student: &StudentFilters) -> Vec<FilterPolicy> {
        let code = match self.field {
            FilterField::Minor => student.minor_code.as_deref(),
            _ => student.program_code.as_deref(),
        };
        let filter = SearchFilter::new()
            .with_opt(self.field, code)
            .with_opt(FilterField::CatalogYear, student.year.as_deref());

        let mut chain = Vec::new();
        push_policy(&mut chain, FilterPolicy::exact(filter));
        push_policy(&mut chain, FilterPolicy::Unfiltered);
        chain
    }
}

/// Multi-year plans: program and resolved plan year, then year only, then a
/// keyword post-filter on program names, then nothing.
pub struct YearPlanStrategy {
    plans: PlansConfig,
    overfetch: usize,
}

impl YearPlanStrategy {
    pub fn new(plans: PlansConfig, overfetch: usize) -> Self {
        YearPlanStrategy { plans, overfetch }
    }
}

#[async_trait]
impl RetrievalStrategy for YearPlanStrategy {
    fn name(&self) -> &'static str {
        "year_plan"
    }

    fn policies(&self, student: &StudentFilters) -> Vec<FilterPolicy> {
        let program = student.program_code.as_deref();
        let year = resolve_plan_year(student.year.as_deref(), self.plans.years_for(program));
        let strict = SearchFilter::new()
            .with_opt(FilterField::Program, program)
            .with_opt(FilterField::CatalogYear, year.as_deref());
        let by_year = strict.without(FilterField::Program);

        let mut chain = Vec::new();
        push_policy(&mut chain, FilterPolicy::exact(strict));
        if !by_year.is_empty() {
            push_policy(&mut chain, FilterPolicy::exact(by_year));
        }
        if !student.program_aliases.is_empty() {
            push_policy(
                &mut chain,
                FilterPolicy::PostFilter {
                    keywords: student.program_aliases.clone(),
                    overfetch: self.overfetch,
                },
            );
        }
        push_policy(&mut chain, FilterPolicy::Unfiltered);
        chain
    }
}

/// General knowledge: always unfiltered, and over-fetches enough to cover whatever
/// the other collections leave unused.
pub struct GeneralKnowledgeStrategy;

#[async_trait]
impl RetrievalStrategy for GeneralKnowledgeStrategy {
    fn name(&self) -> &'static str {
        "general_knowledge"
    }

    fn policies(&self, _student: &StudentFilters) -> Vec<FilterPolicy> {
        vec![FilterPolicy::Unfiltered]
    }

    fn fetch_limit(&self, collection: &str, budget: &ChunkBudget) -> usize {
        budget.get(collection) + budget.others(collection)
    }
}

/// Course listings: catalog year only.
pub struct CourseListingStrategy;

#[async_trait]
impl RetrievalStrategy for CourseListingStrategy {
    fn name(&self) -> &'static str {
        "course_listing"
    }

    fn policies(&self, student: &StudentFilters) -> Vec<FilterPolicy> {
        let filter = SearchFilter::new().with_opt(FilterField::CatalogYear, student.year.as_deref());
        let mut chain = Vec::new();
        push_policy(&mut chain, FilterPolicy::exact(filter));
        push_policy(&mut chain, FilterPolicy::Unfiltered);
        chain
    }
}

/// Collections outside the configured name table.
pub struct UnfilteredStrategy;

#[async_trait]
impl RetrievalStrategy for UnfilteredStrategy {
    fn name(&self) -> &'static str {
        "unfiltered"
    }

    fn policies(&self, _student: &StudentFilters) -> Vec<FilterPolicy> {
        vec![FilterPolicy::Unfiltered]
    }
}

/// Strategy lookup keyed by collection kind.
pub struct StrategyTable {
    strategies: BTreeMap<CollectionKind, Box<dyn RetrievalStrategy>>,
    fallback: Box<dyn RetrievalStrategy>,
}

impl StrategyTable {
    pub fn new(plans: PlansConfig, post_filter_overfetch: usize) -> Self {
        let mut strategies: BTreeMap<CollectionKind, Box<dyn RetrievalStrategy>> = BTreeMap::new();
        strategies.insert(CollectionKind::MajorCatalog, Box::new(CatalogStrategy::major()));
        strategies.insert(CollectionKind::MinorCatalog, Box::new(CatalogStrategy::minor()));
        strategies.insert(
            CollectionKind::YearPlan,
            Box::new(YearPlanStrategy::new(plans, post_filter_overfetch)),
        );
        strategies.insert(CollectionKind::GeneralKnowledge, Box::new(GeneralKnowledgeStrategy));
        strategies.insert(CollectionKind::CourseListing, Box::new(CourseListingStrategy));
        StrategyTable {
            strategies,
            fallback: Box::new(UnfilteredStrategy),
        }
    }

    /// Strategy for `kind`; unknown collections are searched unfiltered.
    pub fn get(&self, kind: Option<CollectionKind>) -> &dyn RetrievalStrategy {
        match kind.and_then(|k| self.strategies.get(&k)) {
            Some(strategy) => strategy.as_ref(),
            None => self.fallback.as_ref(),
        }
    }
}
