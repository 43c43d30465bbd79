//! Batch ingestion of context records into persisted embeddings
//!
//! Chunked, retried, idempotent: each chunk is one retry/commit unit,
//! partial failures are isolated to specific records, and re-running
//! over unchanged records touches neither the provider nor storage.

mod pipeline;

pub use pipeline::{IngestOptions, IngestPipeline};

use crate::embedding::EmbedError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One input record: entity key plus the free text to embed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextRecord {
    pub entity_id: String,
    pub context_text: String,
}

/// Cause discriminator for user-visible per-record failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    Auth,
    RateLimit,
    Schema,
    Persistence,
    Other,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Auth => "auth",
            FailureKind::RateLimit => "rate-limit",
            FailureKind::Schema => "schema",
            FailureKind::Persistence => "persistence",
            FailureKind::Other => "other",
        }
    }

    pub(crate) fn from_embed(error: &EmbedError) -> Self {
        match error {
            EmbedError::Configuration(_) => FailureKind::Auth,
            EmbedError::Transient(_) => FailureKind::RateLimit,
            EmbedError::Schema { .. } => FailureKind::Schema,
            EmbedError::CountMismatch { .. } | EmbedError::InvalidInput(_) => FailureKind::Other,
        }
    }
}

/// One failed record, named with its cause
#[derive(Debug, Clone, Serialize)]
pub struct IngestFailure {
    pub entity_id: String,
    pub kind: FailureKind,
    pub message: String,
}

/// Outcome of one ingestion run
#[derive(Debug, Serialize)]
pub struct IngestReport {
    pub run_id: Uuid,
    /// Records supplied to the run
    pub total: usize,
    /// Records persisted or confirmed unchanged
    pub succeeded: usize,
    /// Records skipped because their stored fingerprint already matched
    pub unchanged: usize,
    /// Records resolved from the embedding cache
    pub cache_hits: usize,
    /// Provider calls actually issued (batched or isolated)
    pub provider_calls: usize,
    /// Backoff waits taken across all chunks
    pub retries: usize,
    pub failures: Vec<IngestFailure>,
    pub duration_ms: u64,
}

impl IngestReport {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}
