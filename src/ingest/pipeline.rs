//! Chunked ingestion pipeline
//!
//! Each chunk runs an explicit state machine:
//! Pending -> Attempting -> Backoff -> Isolating -> {Committed | Failed}.
//! Chunks are scheduled onto a bounded worker pool; cancellation is
//! honored between chunk boundaries, so an interrupted run leaves every
//! committed chunk intact and no half-written chunk.

use super::{ContextRecord, FailureKind, IngestFailure, IngestReport};
use crate::config::IngestConfig;
use crate::embedding::{
    content_hash, CacheKey, DimensionAdvisor, EmbedError, EmbeddingCache, EmbeddingProvider,
};
use crate::error::{CohortixError, Result};
use crate::storage::{EmbeddingRow, Fingerprint, SqliteStore};
use ahash::AHashMap;
use rand::Rng;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use uuid::Uuid;

/// Pipeline tuning, consumed from configuration
#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub chunk_size: usize,
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub max_concurrent_chunks: usize,
    /// Issue a one-shot probe before ingestion when the dimension is not
    /// explicitly configured
    pub probe_dimension: bool,
}

impl IngestOptions {
    pub fn from_config(config: &IngestConfig, probe_dimension: bool) -> Self {
        Self {
            chunk_size: config.chunk_size,
            max_retries: config.max_retries,
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            max_concurrent_chunks: config.max_concurrent_chunks,
            probe_dimension,
        }
    }
}

/// Per-chunk retry/commit state machine
enum ChunkState {
    Pending,
    Attempting { attempt: u32 },
    Backoff { attempt: u32 },
    Isolating,
    Committed,
    Failed,
}

/// Everything a chunk task needs, passed explicitly rather than through
/// shared session state
#[derive(Clone)]
struct ChunkContext {
    provider: Arc<dyn EmbeddingProvider>,
    store: Arc<SqliteStore>,
    cache: Arc<EmbeddingCache>,
    advisor: Arc<DimensionAdvisor>,
    max_retries: u32,
    backoff_base: Duration,
    /// First schema/configuration fault seen; aborts the whole run
    fatal: Arc<Mutex<Option<EmbedError>>>,
}

impl ChunkContext {
    fn set_fatal(&self, error: EmbedError) {
        let mut fatal = self.fatal.lock().unwrap();
        if fatal.is_none() {
            *fatal = Some(error);
        }
    }

    fn is_fatal(&self) -> bool {
        self.fatal.lock().unwrap().is_some()
    }
}

#[derive(Clone)]
struct PreparedRecord {
    entity_id: String,
    text: String,
    hash: String,
}

#[derive(Debug, Default)]
struct ChunkReport {
    committed: usize,
    cache_hits: usize,
    provider_calls: usize,
    retries: usize,
    failures: Vec<IngestFailure>,
}

/// Batch ingestion pipeline
pub struct IngestPipeline {
    ctx: ChunkContext,
    options: IngestOptions,
}

impl IngestPipeline {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        store: Arc<SqliteStore>,
        cache: Arc<EmbeddingCache>,
        advisor: Arc<DimensionAdvisor>,
        options: IngestOptions,
    ) -> Self {
        Self {
            ctx: ChunkContext {
                provider,
                store,
                cache,
                advisor,
                max_retries: options.max_retries,
                backoff_base: options.backoff_base,
                fatal: Arc::new(Mutex::new(None)),
            },
            options,
        }
    }

    /// Ingest an ordered record set
    pub async fn run(&self, records: Vec<ContextRecord>) -> Result<IngestReport> {
        self.run_with_cancel(records, Arc::new(AtomicBool::new(false)))
            .await
    }

    /// Ingest with a cancellation flag, checked between chunk boundaries
    pub async fn run_with_cancel(
        &self,
        records: Vec<ContextRecord>,
        cancel: Arc<AtomicBool>,
    ) -> Result<IngestReport> {
        let started = Instant::now();
        let run_id = Uuid::new_v4();
        let total = records.len();

        tracing::info!("Ingestion run {} starting: {} records", run_id, total);

        if self.options.probe_dimension && self.ctx.advisor.get().is_none() {
            self.ctx.advisor.probe(self.ctx.provider.as_ref()).await?;
        }
        if let Some(dim) = self.ctx.advisor.get() {
            self.ctx.store.ensure_collection(dim)?;
        }

        self.warm_cache()?;

        let provider_id = self.ctx.provider.provider_id().to_string();
        let model_id = self.ctx.provider.model_id().to_string();

        // Skip records whose stored fingerprint already matches: no
        // provider call, no rewrite.
        let prepared: Vec<PreparedRecord> = records
            .iter()
            .map(|r| PreparedRecord {
                entity_id: r.entity_id.clone(),
                text: r.context_text.clone(),
                hash: content_hash(&r.context_text),
            })
            .collect();
        let ids: Vec<String> = prepared.iter().map(|r| r.entity_id.clone()).collect();
        let stored = self.ctx.store.fingerprints(&ids)?;

        let mut unchanged = 0;
        let mut work = Vec::new();
        for record in prepared {
            let expected = Fingerprint {
                content_hash: record.hash.clone(),
                provider: provider_id.clone(),
                model: model_id.clone(),
            };
            if stored.get(&record.entity_id) == Some(&expected) {
                unchanged += 1;
            } else {
                work.push(record);
            }
        }

        let chunk_reports = self.run_chunks(work, &cancel).await?;

        let mut report = IngestReport {
            run_id,
            total,
            succeeded: unchanged,
            unchanged,
            cache_hits: 0,
            provider_calls: 0,
            retries: 0,
            failures: Vec::new(),
            duration_ms: 0,
        };
        for (_, chunk) in chunk_reports {
            report.succeeded += chunk.committed;
            report.cache_hits += chunk.cache_hits;
            report.provider_calls += chunk.provider_calls;
            report.retries += chunk.retries;
            report.failures.extend(chunk.failures);
        }
        report.duration_ms = started.elapsed().as_millis() as u64;

        if let Some(fatal) = self.ctx.fatal.lock().unwrap().take() {
            tracing::error!(
                "Ingestion run {} aborted after {} committed records: {}",
                run_id,
                report.succeeded,
                fatal
            );
            return Err(fatal.into());
        }

        tracing::info!(
            "Ingestion run {} complete: {} succeeded ({} unchanged), {} failed, {}ms",
            run_id,
            report.succeeded,
            report.unchanged,
            report.failed(),
            report.duration_ms
        );

        Ok(report)
    }

    /// Preload the cache from already-persisted vectors so a fresh
    /// process still reaches full hit rate on unchanged content
    fn warm_cache(&self) -> Result<()> {
        for seed in self.ctx.store.load_cache_seeds()? {
            self.ctx.cache.put(
                CacheKey::new(
                    seed.fingerprint.content_hash,
                    seed.fingerprint.provider,
                    seed.fingerprint.model,
                ),
                seed.vector,
            );
        }
        Ok(())
    }

    /// Schedule chunks onto the bounded worker pool
    async fn run_chunks(
        &self,
        work: Vec<PreparedRecord>,
        cancel: &AtomicBool,
    ) -> Result<BTreeMap<usize, ChunkReport>> {
        let semaphore = Arc::new(Semaphore::new(self.options.max_concurrent_chunks));
        let mut tasks = JoinSet::new();

        for (index, chunk) in work.chunks(self.options.chunk_size).enumerate() {
            if cancel.load(Ordering::SeqCst) {
                tracing::warn!("Cancellation requested; stopping at chunk boundary {}", index);
                break;
            }
            if self.ctx.is_fatal() {
                break;
            }

            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| CohortixError::Other(anyhow::anyhow!("worker pool closed: {}", e)))?;
            let ctx = self.ctx.clone();
            let chunk = chunk.to_vec();

            tasks.spawn(async move {
                let _permit = permit;
                (index, process_chunk(ctx, chunk).await)
            });
        }

        let mut reports = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            let (index, chunk_report) = joined
                .map_err(|e| CohortixError::Other(anyhow::anyhow!("chunk task failed: {}", e)))?;
            reports.insert(index, chunk_report);
        }

        Ok(reports)
    }
}

/// Drive one chunk through the state machine
async fn process_chunk(ctx: ChunkContext, records: Vec<PreparedRecord>) -> ChunkReport {
    let mut report = ChunkReport::default();
    let provider_id = ctx.provider.provider_id().to_string();
    let model_id = ctx.provider.model_id().to_string();

    // Partition by cache membership
    let mut vectors: AHashMap<String, Vec<f32>> = AHashMap::new();
    let mut misses = Vec::new();
    for record in &records {
        let key = CacheKey::new(record.hash.clone(), provider_id.clone(), model_id.clone());
        if let Some(vector) = ctx.cache.get(&key) {
            report.cache_hits += 1;
            vectors.insert(record.entity_id.clone(), (*vector).clone());
        } else {
            misses.push(record.clone());
        }
    }

    let texts: Vec<String> = misses.iter().map(|r| r.text.clone()).collect();
    let mut state = ChunkState::Pending;

    loop {
        state = match state {
            ChunkState::Pending => {
                if misses.is_empty() {
                    persist(&ctx, &records, &vectors, &mut report)
                } else {
                    ChunkState::Attempting { attempt: 0 }
                }
            }

            ChunkState::Attempting { attempt } => {
                report.provider_calls += 1;
                match ctx.provider.embed_batch(&texts).await {
                    Ok(batch) if batch.len() != misses.len() => {
                        tracing::warn!(
                            "Provider returned {} vectors for {} inputs",
                            batch.len(),
                            misses.len()
                        );
                        if attempt < ctx.max_retries {
                            ChunkState::Backoff { attempt }
                        } else {
                            ChunkState::Isolating
                        }
                    }
                    Ok(batch) => match accept_batch(&ctx, &misses, batch, &mut vectors) {
                        Ok(()) => persist(&ctx, &records, &vectors, &mut report),
                        Err(schema) => {
                            ctx.set_fatal(schema);
                            ChunkState::Failed
                        }
                    },
                    Err(error @ EmbedError::Schema { .. }) => {
                        ctx.set_fatal(error);
                        ChunkState::Failed
                    }
                    Err(error @ EmbedError::Configuration(_)) => {
                        ctx.set_fatal(error);
                        ChunkState::Failed
                    }
                    Err(error) if error.is_retryable() && attempt < ctx.max_retries => {
                        tracing::debug!("Chunk attempt {} failed transiently: {}", attempt, error);
                        ChunkState::Backoff { attempt }
                    }
                    Err(_) => ChunkState::Isolating,
                }
            }

            ChunkState::Backoff { attempt } => {
                let delay = backoff_delay(ctx.backoff_base, attempt);
                report.retries += 1;
                tokio::time::sleep(delay).await;
                ChunkState::Attempting {
                    attempt: attempt + 1,
                }
            }

            // Retries exhausted: resubmit one record at a time so a
            // single poisoned record cannot sink its chunk-mates.
            ChunkState::Isolating => {
                let mut fatal = false;
                for record in &misses {
                    report.provider_calls += 1;
                    match ctx
                        .provider
                        .embed_batch(std::slice::from_ref(&record.text))
                        .await
                    {
                        Ok(mut single) if single.len() == 1 => {
                            let vector = single.pop().unwrap_or_default();
                            match ctx.advisor.observe(vector.len()) {
                                Ok(_) => {
                                    vectors.insert(record.entity_id.clone(), vector);
                                }
                                Err(schema) => {
                                    ctx.set_fatal(schema);
                                    fatal = true;
                                    break;
                                }
                            }
                        }
                        Ok(single) => {
                            report.failures.push(IngestFailure {
                                entity_id: record.entity_id.clone(),
                                kind: FailureKind::Other,
                                message: format!(
                                    "Provider returned {} vectors for 1 input",
                                    single.len()
                                ),
                            });
                        }
                        Err(error @ (EmbedError::Schema { .. } | EmbedError::Configuration(_))) => {
                            ctx.set_fatal(error);
                            fatal = true;
                            break;
                        }
                        Err(error) => {
                            report.failures.push(IngestFailure {
                                entity_id: record.entity_id.clone(),
                                kind: FailureKind::from_embed(&error),
                                message: error.to_string(),
                            });
                        }
                    }
                }

                if fatal {
                    ChunkState::Failed
                } else {
                    persist(&ctx, &records, &vectors, &mut report)
                }
            }

            ChunkState::Committed => {
                // Newly computed vectors enter the cache once the chunk
                // is durable
                for record in &misses {
                    if let Some(vector) = vectors.get(&record.entity_id) {
                        ctx.cache.put(
                            CacheKey::new(
                                record.hash.clone(),
                                provider_id.clone(),
                                model_id.clone(),
                            ),
                            vector.clone(),
                        );
                    }
                }
                break;
            }

            ChunkState::Failed => break,
        };
    }

    report
}

/// Validate every accepted vector's length against the advisory width
fn accept_batch(
    ctx: &ChunkContext,
    misses: &[PreparedRecord],
    batch: Vec<Vec<f32>>,
    vectors: &mut AHashMap<String, Vec<f32>>,
) -> std::result::Result<(), EmbedError> {
    for (record, vector) in misses.iter().zip(batch) {
        ctx.advisor.observe(vector.len())?;
        vectors.insert(record.entity_id.clone(), vector);
    }
    Ok(())
}

/// Commit the chunk's resolved vectors in one transaction
fn persist(
    ctx: &ChunkContext,
    records: &[PreparedRecord],
    vectors: &AHashMap<String, Vec<f32>>,
    report: &mut ChunkReport,
) -> ChunkState {
    let rows: Vec<EmbeddingRow> = records
        .iter()
        .filter_map(|record| {
            vectors.get(&record.entity_id).map(|vector| EmbeddingRow {
                entity_id: record.entity_id.clone(),
                context_text: record.text.clone(),
                vector: vector.clone(),
                content_hash: record.hash.clone(),
                provider: ctx.provider.provider_id().to_string(),
                model: ctx.provider.model_id().to_string(),
            })
        })
        .collect();

    if rows.is_empty() {
        return ChunkState::Committed;
    }

    let commit = ctx
        .advisor
        .get()
        .map(|dim| ctx.store.ensure_collection(dim))
        .unwrap_or(Ok(()))
        .and_then(|_| ctx.store.upsert_embeddings(&rows));

    match commit {
        Ok(_) => {
            report.committed += rows.len();
            ChunkState::Committed
        }
        Err(CohortixError::Embed(schema @ EmbedError::Schema { .. })) => {
            ctx.set_fatal(schema);
            ChunkState::Failed
        }
        Err(error) => {
            tracing::warn!("Chunk commit failed: {}", error);
            let message = error.to_string();
            for row in &rows {
                report.failures.push(IngestFailure {
                    entity_id: row.entity_id.clone(),
                    kind: FailureKind::Persistence,
                    message: message.clone(),
                });
            }
            ChunkState::Failed
        }
    }
}

/// Exponential backoff with random jitter
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exp = base.saturating_mul(2u32.saturating_pow(attempt));
    let jitter_ms = {
        let mut rng = rand::thread_rng();
        rng.gen_range(0..=(exp.as_millis() as u64) / 2)
    };
    exp + Duration::from_millis(jitter_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_exponentially() {
        let base = Duration::from_millis(100);

        for attempt in 0..4 {
            let floor = base * 2u32.pow(attempt);
            let delay = backoff_delay(base, attempt);
            assert!(delay >= floor);
            assert!(delay <= floor + floor / 2);
        }
    }
}
