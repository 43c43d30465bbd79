//! Fused search integration tests
//!
//! Seeds a temp-dir store with crafted unit vectors so cosine scores are
//! exact, then exercises narrowing, ranking determinism, explanations,
//! and schema rejection.

use async_trait::async_trait;
use cohortix::embedding::{DimensionAdvisor, EmbedError, EmbeddingProvider};
use cohortix::search::{FusedSearchEngine, Predicate, SearchQuery};
use cohortix::storage::{EmbeddingRow, PatientAttributes, SqliteStore};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

const NOW: i64 = 1_700_000_000;

/// Provider that always returns a fixed query vector
struct FixedVectorProvider {
    vector: Vec<f32>,
    calls: AtomicUsize,
}

impl FixedVectorProvider {
    fn new(vector: Vec<f32>) -> Self {
        Self {
            vector,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for FixedVectorProvider {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|_| self.vector.clone()).collect())
    }

    fn provider_id(&self) -> &str {
        "stub"
    }

    fn model_id(&self) -> &str {
        "stub-model"
    }
}

/// Unit vector whose cosine against [1, 0] is exactly `score`
fn unit_vector(score: f32) -> Vec<f32> {
    vec![score, (1.0 - score * score).sqrt()]
}

fn seed_row(id: &str, vector: Vec<f32>) -> EmbeddingRow {
    EmbeddingRow {
        entity_id: id.to_string(),
        context_text: format!("summary for {}", id),
        vector,
        content_hash: format!("hash-{}", id),
        provider: "stub".to_string(),
        model: "stub-model".to_string(),
    }
}

fn female_senior(id: &str) -> PatientAttributes {
    PatientAttributes {
        entity_id: id.to_string(),
        gender: Some("female".to_string()),
        age_bucket: Some("65+".to_string()),
        conditions: vec!["hypertension".to_string()],
        last_visit: Some(NOW - 30 * 86_400),
    }
}

fn engine_over(
    store: Arc<SqliteStore>,
    query_vector: Vec<f32>,
) -> (FusedSearchEngine, Arc<FixedVectorProvider>) {
    let provider = Arc::new(FixedVectorProvider::new(query_vector));
    let engine = FusedSearchEngine::new(
        provider.clone(),
        store,
        Arc::new(DimensionAdvisor::new(Some(2))),
    );
    (engine, provider)
}

fn temp_store() -> (Arc<SqliteStore>, TempDir) {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(SqliteStore::new(&temp.path().join("store.db")).unwrap());
    (store, temp)
}

#[tokio::test]
async fn test_filters_narrow_before_ranking() {
    // The 0.91-scored patient is male, so the female/65+ query never
    // sees him; the two tied 0.80 candidates win, ascending by id
    let (store, _temp) = temp_store();

    store
        .upsert_embeddings(&[
            seed_row("p-alpha", unit_vector(0.91)),
            seed_row("p-bravo", unit_vector(0.80)),
            seed_row("p-charlie", unit_vector(0.80)),
            seed_row("p-delta", unit_vector(0.5)),
            seed_row("p-echo", unit_vector(0.3)),
        ])
        .unwrap();

    let mut alpha = female_senior("p-alpha");
    alpha.gender = Some("male".to_string());
    store
        .upsert_patients(&[
            alpha,
            female_senior("p-bravo"),
            female_senior("p-charlie"),
            female_senior("p-delta"),
            female_senior("p-echo"),
        ])
        .unwrap();

    let (engine, _provider) = engine_over(store, vec![1.0, 0.0]);
    let query = SearchQuery::new("female patients 65 and older in declining health", 2);
    let results = engine.search_at(&query, NOW).await.unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].entity_id, "p-bravo");
    assert_eq!(results[1].entity_id, "p-charlie");
    assert_eq!(results[0].rank, 1);
    assert_eq!(results[1].rank, 2);
    assert!((results[0].similarity_score - 0.80).abs() < 1e-4);

    for result in &results {
        assert!(result
            .matched_predicates
            .contains(&Predicate::GenderIs("female".to_string())));
        assert!(result
            .matched_predicates
            .contains(&Predicate::AgeBucketIs("65+".to_string())));
    }
}

#[tokio::test]
async fn test_equal_scores_break_ties_by_entity_id() {
    let (store, _temp) = temp_store();

    // Insert out of id order; all score identically
    store
        .upsert_embeddings(&[
            seed_row("p-zulu", unit_vector(0.75)),
            seed_row("p-alpha", unit_vector(0.75)),
            seed_row("p-mike", unit_vector(0.75)),
        ])
        .unwrap();

    let (engine, _provider) = engine_over(store, vec![1.0, 0.0]);
    let query = SearchQuery::new("progressive memory loss", 3);
    let results = engine.search_at(&query, NOW).await.unwrap();

    let ids: Vec<&str> = results.iter().map(|r| r.entity_id.as_str()).collect();
    assert_eq!(ids, vec!["p-alpha", "p-mike", "p-zulu"]);
}

#[tokio::test]
async fn test_unfiltered_query_ranks_full_population() {
    let (store, _temp) = temp_store();

    store
        .upsert_embeddings(&[
            seed_row("p-one", unit_vector(0.9)),
            seed_row("p-two", unit_vector(0.2)),
        ])
        .unwrap();

    let (engine, _provider) = engine_over(store, vec![1.0, 0.0]);
    // No rule in the table recognizes anything here
    let query = SearchQuery::new("progressive memory loss", 10);
    let results = engine.search_at(&query, NOW).await.unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].entity_id, "p-one");
    // Nothing was filtered, so nothing is matched
    assert!(results[0].matched_predicates.is_empty());
}

#[tokio::test]
async fn test_zero_candidates_is_empty_result_without_embedding() {
    let (store, _temp) = temp_store();

    store
        .upsert_embeddings(&[seed_row("p-one", unit_vector(0.9))])
        .unwrap();
    store.upsert_patients(&[female_senior("p-one")]).unwrap();

    let (engine, provider) = engine_over(store, vec![1.0, 0.0]);
    // Predicate extraction succeeds but no male patients exist; the
    // empty result comes back as-is, with no fallback to unfiltered
    // ranking and no query embedding issued
    let query = SearchQuery::new("male patients with copd", 5);
    let results = engine.search_at(&query, NOW).await.unwrap();

    assert!(results.is_empty());
    assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_visit_window_predicate() {
    let (store, _temp) = temp_store();

    store
        .upsert_embeddings(&[
            seed_row("p-recent", unit_vector(0.6)),
            seed_row("p-stale", unit_vector(0.9)),
        ])
        .unwrap();

    let mut recent = female_senior("p-recent");
    recent.last_visit = Some(NOW - 10 * 86_400);
    let mut stale = female_senior("p-stale");
    stale.last_visit = Some(NOW - 400 * 86_400);
    store.upsert_patients(&[recent, stale]).unwrap();

    let (engine, _provider) = engine_over(store, vec![1.0, 0.0]);
    let query = SearchQuery::new("women seen in the last year", 5);
    let results = engine.search_at(&query, NOW).await.unwrap();

    // The higher-scoring patient is outside the window
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].entity_id, "p-recent");
    assert!(results[0]
        .matched_predicates
        .contains(&Predicate::VisitedWithinDays(365)));
}

#[tokio::test]
async fn test_query_dimension_mismatch_rejected() {
    let (store, _temp) = temp_store();

    store
        .upsert_embeddings(&[seed_row("p-one", unit_vector(0.9))])
        .unwrap();

    // Provider suddenly emits 3-wide vectors against a 2-wide collection
    let (engine, _provider) = engine_over(store, vec![1.0, 0.0, 0.0]);
    let query = SearchQuery::new("progressive memory loss", 5);
    let result = engine.search_at(&query, NOW).await;

    assert!(matches!(
        result,
        Err(cohortix::search::SearchError::Embedding(
            EmbedError::Schema {
                expected: 2,
                actual: 3
            }
        ))
    ));
}

#[tokio::test]
async fn test_empty_query_rejected() {
    let (store, _temp) = temp_store();
    let (engine, _provider) = engine_over(store, vec![1.0, 0.0]);

    let query = SearchQuery::new("   ", 5);
    let result = engine.search_at(&query, NOW).await;

    assert!(matches!(
        result,
        Err(cohortix::search::SearchError::InvalidQuery(_))
    ));
}
