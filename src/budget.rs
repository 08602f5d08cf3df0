/// Per-collection retrieval quotas.
///
/// Quotas start from each collection's weight share of the total, are clamped to
/// `[min, max(collection)]`, and then the leftover budget is handed out in a
/// priority order derived from the query's keywords. The allocation is a pure
/// function of its inputs.

use serde::Serialize;

use crate::collection::CollectionKind;
use crate::config::{CollectionsConfig, RetrievalConfig};
use crate::errors::RetrievalError;
use crate::search::tokenize;

const MAJOR_TERMS: &[&str] = &[
    "major", "degree", "requirement", "requirements", "required", "core", "elective", "electives",
    "graduate", "graduation", "bachelor",
];
const PLAN_TERMS: &[&str] = &[
    "year", "years", "sequence", "plan", "schedule", "semester", "semesters", "freshman",
    "sophomore", "junior", "senior", "first", "second", "third", "fourth",
];
const MINOR_TERMS: &[&str] = &["minor", "minors"];
const GENERAL_TERMS: &[&str] = &[
    "policy", "policies", "registration", "register", "deadline", "deadlines", "advising",
    "advisor", "withdraw", "withdrawal", "transfer", "enroll", "enrollment", "probation",
];

/// Priority groups, highest first.
const PRIORITY: [(CollectionKind, &[&str]); 4] = [
    (CollectionKind::MajorCatalog, MAJOR_TERMS),
    (CollectionKind::YearPlan, PLAN_TERMS),
    (CollectionKind::MinorCatalog, MINOR_TERMS),
    (CollectionKind::GeneralKnowledge, GENERAL_TERMS),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionQuota {
    pub collection: String,
    pub quota: usize,
}

/// Quotas in routing order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChunkBudget {
    quotas: Vec<CollectionQuota>,
}

impl ChunkBudget {
    pub fn get(&self, collection: &str) -> usize {
        self.quotas
            .iter()
            .find(|q| q.collection == collection)
            .map(|q| q.quota)
            .unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.quotas.iter().map(|q| q.quota).sum()
    }

    /// Sum of every quota except `collection`'s.
    pub fn others(&self, collection: &str) -> usize {
        self.total() - self.get(collection)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CollectionQuota> {
        self.quotas.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.quotas.is_empty()
    }

    pub fn len(&self) -> usize {
        self.quotas.len()
    }
}

pub struct ChunkBudgetAllocator {
    retrieval: RetrievalConfig,
    collections: CollectionsConfig,
}

impl ChunkBudgetAllocator {
    pub fn new(retrieval: RetrievalConfig, collections: CollectionsConfig) -> Self {
        ChunkBudgetAllocator {
            retrieval,
            collections,
        }
    }

    /// Compute quotas for `selected` (routing order) given `query`.
    ///
    /// Fails only when the minimums alone cannot fit in the total budget.
    pub fn allocate(&self, selected: &[String], query: &str) -> Result<ChunkBudget, RetrievalError> {
        if selected.is_empty() {
            return Ok(ChunkBudget::default());
        }
        let total = self.retrieval.total_retrieval_budget;
        let min = self.retrieval.min_chunks_per_collection;
        if min * selected.len() > total {
            return Err(RetrievalError::validation(
                "collections",
                &format!(
                    "{} collections x min {} exceeds total retrieval budget {}",
                    selected.len(),
                    min,
                    total
                ),
            ));
        }

        let maxes: Vec<usize> = selected.iter().map(|c| self.retrieval.max_for(c)).collect();
        let weights: Vec<f64> = selected
            .iter()
            .map(|c| self.retrieval.weight_for(c).max(0.0))
            .collect();
        let weight_sum: f64 = weights.iter().sum();

        let mut quotas: Vec<usize> = weights
            .iter()
            .zip(&maxes)
            .map(|(w, max)| {
                let share = if weight_sum > 0.0 {
                    (w / weight_sum * total as f64).floor() as usize
                } else {
                    0
                };
                share.clamp(min, (*max).max(min))
            })
            .collect();

        // Clamping up to min can overshoot; give back from the largest headroom first
        while quotas.iter().sum::<usize>() > total {
            let Some(idx) = most_headroom(&quotas, min) else {
                break;
            };
            quotas[idx] -= 1;
        }

        let mut remaining = total - quotas.iter().sum::<usize>();
        for idx in self.priority_order(selected, query) {
            if remaining == 0 {
                break;
            }
            let room = maxes[idx].saturating_sub(quotas[idx]);
            let add = room.min(remaining);
            quotas[idx] += add;
            remaining -= add;
        }

        Ok(ChunkBudget {
            quotas: selected
                .iter()
                .cloned()
                .zip(quotas)
                .map(|(collection, quota)| CollectionQuota { collection, quota })
                .collect(),
        })
    }

    /// Indices into `selected`: keyword-matched groups first, then the rest in
    /// selection order.
    fn priority_order(&self, selected: &[String], query: &str) -> Vec<usize> {
        let tokens = tokenize(query);
        let mut order: Vec<usize> = Vec::with_capacity(selected.len());

        for (kind, terms) in PRIORITY {
            if !tokens.iter().any(|t| terms.contains(&t.as_str())) {
                continue;
            }
            let name = self.collections.name(kind);
            if let Some(idx) = selected.iter().position(|c| c == name) {
                if !order.contains(&idx) {
                    order.push(idx);
                }
            }
        }
        for idx in 0..selected.len() {
            if !order.contains(&idx) {
                order.push(idx);
            }
        }
        order
    }
}

fn most_headroom(quotas: &[usize], min: usize) -> Option<usize> {
    let mut best: Option<(usize, usize)> = None;
    for (idx, q) in quotas.iter().enumerate() {
        let headroom = q.saturating_sub(min);
        if headroom == 0 {
            continue;
        }
        if best.map(|(_, h)| headroom > h).unwrap_or(true) {
            best = Some((idx, headroom));
        }
    }
    best.map(|(idx, _)| idx)
}
