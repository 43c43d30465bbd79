//! Storage layer for Cohortix
//!
//! SQLite adapter playing the role of the downstream structured/vector
//! store: schema provisioning with the discovered dimension, idempotent
//! upserts of (entity, text, vector), predicate-based candidate lookups,
//! and a nearest-neighbor primitive scoped to a candidate set.

mod sqlite;

pub use sqlite::{DbPool, SqliteStore, StoreStats, UpsertStats};

use serde::{Deserialize, Serialize};

/// Structured attributes the store owns for candidate narrowing
///
/// Seeded by the orchestrator alongside ingestion; the core never derives
/// these from context text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientAttributes {
    pub entity_id: String,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub age_bucket: Option<String>,
    #[serde(default)]
    pub conditions: Vec<String>,
    /// Unix timestamp of the most recent encounter
    #[serde(default)]
    pub last_visit: Option<i64>,
}

/// One persisted embedding row, upserted by entity id
#[derive(Debug, Clone)]
pub struct EmbeddingRow {
    pub entity_id: String,
    pub context_text: String,
    pub vector: Vec<f32>,
    pub content_hash: String,
    pub provider: String,
    pub model: String,
}

/// The (hash, provider, model) identity of a stored vector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub content_hash: String,
    pub provider: String,
    pub model: String,
}

/// Persisted cache seed: fingerprint plus vector, for warm-up
#[derive(Debug, Clone)]
pub struct CacheSeed {
    pub fingerprint: Fingerprint,
    pub vector: Vec<f32>,
}
