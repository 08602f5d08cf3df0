/// Embedding-similarity routing.
///
/// Each collection kind is represented by the mean embedding of a handful of
/// example questions. Centroids are computed once, on first use, through the
/// injected embedding provider; a failed computation is retried on the next call.

use std::sync::Arc;

use tokio::sync::OnceCell;

use crate::collection::CollectionKind;
use crate::embedding::{EmbeddingError, EmbeddingProvider, cosine_similarity, mean_vector};

pub(crate) fn example_questions(kind: CollectionKind) -> &'static [&'static str] {
    match kind {
        CollectionKind::MajorCatalog => &[
            "What are the Computer Science major requirements?",
            "What courses do I need to graduate with a CS degree?",
            "What are the prerequisites for upper division courses?",
            "Graduation requirements for engineering majors",
        ],
        CollectionKind::YearPlan => &[
            "What courses should I take freshman year?",
            "What is the recommended course sequence?",
            "When should I take calculus and physics?",
            "Course schedule for first year students",
        ],
        CollectionKind::MinorCatalog => &[
            "What minors are available?",
            "Requirements for analytics minor",
            "How do I declare a business minor?",
            "What courses are needed for the data science minor?",
        ],
        CollectionKind::GeneralKnowledge => &[
            "When is registration?",
            "How do I get permission numbers?",
            "What is the academic calendar?",
            "Transfer credit policies and procedures",
        ],
        CollectionKind::CourseListing => &[
            "What is CPSC 350 about?",
            "How many units is the data structures course?",
            "Which semesters is linear algebra offered?",
            "Course description for introduction to programming",
        ],
    }
}

pub(crate) struct SemanticRouter {
    embedder: Arc<dyn EmbeddingProvider>,
    centroids: OnceCell<Vec<(CollectionKind, Vec<f32>)>>,
}

impl SemanticRouter {
    pub(crate) fn new(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        SemanticRouter {
            embedder,
            centroids: OnceCell::new(),
        }
    }

    async fn centroids(&self) -> Result<&[(CollectionKind, Vec<f32>)], EmbeddingError> {
        let centroids = self
            .centroids
            .get_or_try_init(|| async {
                let mut out = Vec::with_capacity(CollectionKind::ALL.len());
                for kind in CollectionKind::ALL {
                    let texts: Vec<String> =
                        example_questions(kind).iter().map(|s| s.to_string()).collect();
                    let vectors = self.embedder.embed_batch(&texts).await?;
                    let centroid = mean_vector(&vectors).ok_or_else(|| {
                        EmbeddingError::Generation(format!("no example embeddings for {}", kind))
                    })?;
                    out.push((kind, centroid));
                }
                tracing::debug!(model = self.embedder.model_name(), "Computed routing centroids");
                Ok::<_, EmbeddingError>(out)
            })
            .await?;
        Ok(centroids.as_slice())
    }

    /// Kinds whose centroid similarity exceeds `threshold`, best first.
    pub(crate) async fn rank(
        &self,
        query: &str,
        threshold: f32,
    ) -> Result<Vec<(CollectionKind, f32)>, EmbeddingError> {
        let centroids = self.centroids().await?;
        let query_vec = self.embedder.embed(query).await?;

        let mut scored: Vec<(CollectionKind, f32)> = centroids
            .iter()
            .map(|(kind, centroid)| (*kind, cosine_similarity(&query_vec, centroid)))
            .filter(|(_, s)| *s > threshold)
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        Ok(scored)
    }
}
