//! Fused search engine

use super::{FilterExtractor, Predicate, SearchQuery, SearchResult};
use crate::embedding::{DimensionAdvisor, EmbedError, EmbeddingProvider};
use crate::storage::SqliteStore;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SearchError {
    /// Query embedding failures propagate unchanged
    #[error(transparent)]
    Embedding(#[from] EmbedError),

    #[error("Store lookup failed: {0}")]
    Store(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),
}

/// Combines deterministic attribute filtering with vector ranking
///
/// Narrowing happens before scoring: the structured store bounds the
/// candidate set, then the store's nearest-neighbor primitive ranks it
/// against the embedded query.
pub struct FusedSearchEngine {
    provider: Arc<dyn EmbeddingProvider>,
    store: Arc<SqliteStore>,
    advisor: Arc<DimensionAdvisor>,
    extractor: FilterExtractor,
}

impl FusedSearchEngine {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        store: Arc<SqliteStore>,
        advisor: Arc<DimensionAdvisor>,
    ) -> Self {
        Self {
            provider,
            store,
            advisor,
            extractor: FilterExtractor::new(),
        }
    }

    /// Run a fused search
    pub async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchResult>, SearchError> {
        self.search_at(query, chrono::Utc::now().timestamp()).await
    }

    /// Run a fused search with an explicit "now" for time-window
    /// predicates. Split out so ranking is reproducible under test.
    pub async fn search_at(
        &self,
        query: &SearchQuery,
        now: i64,
    ) -> Result<Vec<SearchResult>, SearchError> {
        if query.text.trim().is_empty() {
            return Err(SearchError::InvalidQuery(
                "Query text cannot be empty".to_string(),
            ));
        }

        // Step 1: best-effort filter extraction
        let predicates = self.extractor.extract(&query.text);
        tracing::debug!("Extracted {} predicates", predicates.len());

        // Step 2: candidate narrowing. An empty candidate set is a valid
        // empty result, not an error, and there is no fallback to
        // unfiltered ranking.
        let candidates = self
            .store
            .filter_candidates(&predicates, now)
            .map_err(|e| SearchError::Store(e.to_string()))?;
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        // Step 3: embed the raw query with the ingestion-time provider
        let mut vectors = self
            .provider
            .embed_batch(std::slice::from_ref(&query.text))
            .await?;
        let query_vector = vectors
            .pop()
            .ok_or(EmbedError::CountMismatch { want: 1, got: 0 })?;
        self.advisor.observe(query_vector.len())?;

        // Steps 4-5: cosine ranking via the store's primitive, then
        // re-assert deterministic order before truncation
        let mut ranked = self
            .store
            .nearest_neighbors(&query_vector, &candidates, query.top_k)
            .map_err(|e| SearchError::Store(e.to_string()))?;
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });

        // Step 6: explanation
        let ids: Vec<String> = ranked.iter().map(|(id, _)| id.clone()).collect();
        let attributes = self
            .store
            .get_attributes(&ids)
            .map_err(|e| SearchError::Store(e.to_string()))?;

        let results = ranked
            .into_iter()
            .enumerate()
            .map(|(i, (entity_id, score))| {
                let matched_predicates = attributes
                    .get(&entity_id)
                    .map(|attrs| {
                        predicates
                            .iter()
                            .filter(|p| p.matches(attrs, now))
                            .cloned()
                            .collect()
                    })
                    .unwrap_or_default();

                SearchResult {
                    entity_id,
                    similarity_score: score,
                    rank: i + 1,
                    matched_predicates,
                }
            })
            .collect();

        Ok(results)
    }
}
