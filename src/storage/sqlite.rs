//! SQLite-backed store with migrations
//!
//! Vectors are stored as little-endian f32 BLOBs next to their source
//! text. Nearest-neighbor lookup is the store's primitive: cosine over a
//! supplied candidate set, deterministic on ties.

use super::{CacheSeed, EmbeddingRow, Fingerprint, PatientAttributes};
use crate::embedding::EmbedError;
use crate::error::{CohortixError, Result};
use crate::search::Predicate;
use ahash::AHashMap;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, params_from_iter, types::Value, OptionalExtension};
use std::path::Path;

/// Database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// SQLite store adapter
pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    /// Open (or create) the store at the given path and run migrations
    pub fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CohortixError::Io {
                source: e,
                context: format!("Failed to create database directory: {:?}", parent),
            })?;
        }

        let manager = SqliteConnectionManager::file(db_path);

        let pool = Pool::builder()
            .max_size(16)
            .build(manager)
            .map_err(|e| CohortixError::Config(format!("Failed to create connection pool: {}", e)))?;

        {
            let conn = pool
                .get()
                .map_err(|e| CohortixError::Config(format!("Failed to get connection: {}", e)))?;

            // WAL keeps concurrent chunk commits from blocking readers
            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                PRAGMA foreign_keys = ON;
                PRAGMA busy_timeout = 5000;
                ",
            )?;
        }

        let store = Self { pool };
        store.migrate()?;

        Ok(store)
    }

    /// Get a connection from the pool
    pub fn get_conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| CohortixError::Config(format!("Failed to get connection: {}", e)))
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.get_conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
            [],
        )?;

        let current_version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM _migrations",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        for (version, migration) in MIGRATIONS.iter().enumerate() {
            let version = version as i32 + 1;

            if version > current_version {
                tracing::info!("Applying migration {}", version);
                conn.execute_batch(migration)?;
                conn.execute(
                    "INSERT INTO _migrations (version, applied_at) VALUES (?1, datetime('now'))",
                    params![version],
                )?;
            }
        }

        Ok(())
    }

    /// Provision the collection with its vector width, or verify the
    /// existing provision. A different existing width is fatal.
    pub fn ensure_collection(&self, dimension: usize) -> Result<()> {
        let conn = self.get_conn()?;

        let existing: Option<i64> = conn
            .query_row("SELECT dimension FROM collection_meta WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()?;

        match existing {
            Some(dim) if dim as usize == dimension => Ok(()),
            Some(dim) => Err(EmbedError::Schema {
                expected: dim as usize,
                actual: dimension,
            }
            .into()),
            None => {
                conn.execute(
                    "INSERT INTO collection_meta (id, dimension, provisioned_at)
                     VALUES (1, ?1, ?2)",
                    params![dimension as i64, chrono::Utc::now().timestamp()],
                )?;
                tracing::info!("Provisioned collection with dimension {}", dimension);
                Ok(())
            }
        }
    }

    /// The provisioned collection dimension, if any
    pub fn collection_dimension(&self) -> Result<Option<usize>> {
        let conn = self.get_conn()?;
        let dim: Option<i64> = conn
            .query_row("SELECT dimension FROM collection_meta WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(dim.map(|d| d as usize))
    }

    /// Upsert embedding rows in one transaction (one chunk commit)
    ///
    /// Rows whose stored fingerprint already matches are skipped, so
    /// re-ingesting unchanged records rewrites nothing.
    pub fn upsert_embeddings(&self, rows: &[EmbeddingRow]) -> Result<UpsertStats> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        let now = chrono::Utc::now().timestamp();

        let mut stats = UpsertStats::default();

        {
            let mut existing_stmt = tx.prepare(
                "SELECT content_hash, provider, model FROM embeddings WHERE entity_id = ?1",
            )?;
            let mut upsert_stmt = tx.prepare(
                "INSERT INTO embeddings
                     (entity_id, context_text, vector, content_hash, provider, model, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(entity_id) DO UPDATE SET
                     context_text = excluded.context_text,
                     vector = excluded.vector,
                     content_hash = excluded.content_hash,
                     provider = excluded.provider,
                     model = excluded.model,
                     created_at = excluded.created_at",
            )?;

            for row in rows {
                let existing: Option<Fingerprint> = existing_stmt
                    .query_row(params![row.entity_id], |r| {
                        Ok(Fingerprint {
                            content_hash: r.get(0)?,
                            provider: r.get(1)?,
                            model: r.get(2)?,
                        })
                    })
                    .optional()?;

                let incoming = Fingerprint {
                    content_hash: row.content_hash.clone(),
                    provider: row.provider.clone(),
                    model: row.model.clone(),
                };

                if existing.as_ref() == Some(&incoming) {
                    stats.skipped += 1;
                    continue;
                }

                upsert_stmt.execute(params![
                    row.entity_id,
                    row.context_text,
                    vector_to_blob(&row.vector),
                    row.content_hash,
                    row.provider,
                    row.model,
                    now,
                ])?;
                stats.written += 1;
            }
        }

        tx.commit()?;
        Ok(stats)
    }

    /// Stored fingerprints for the given entity ids
    pub fn fingerprints(&self, entity_ids: &[String]) -> Result<AHashMap<String, Fingerprint>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT content_hash, provider, model FROM embeddings WHERE entity_id = ?1",
        )?;

        let mut out = AHashMap::new();
        for id in entity_ids {
            let fingerprint = stmt
                .query_row(params![id], |r| {
                    Ok(Fingerprint {
                        content_hash: r.get(0)?,
                        provider: r.get(1)?,
                        model: r.get(2)?,
                    })
                })
                .optional()?;
            if let Some(fp) = fingerprint {
                out.insert(id.clone(), fp);
            }
        }

        Ok(out)
    }

    /// All stored (fingerprint, vector) pairs, for cache warm-up
    pub fn load_cache_seeds(&self) -> Result<Vec<CacheSeed>> {
        let conn = self.get_conn()?;
        let mut stmt =
            conn.prepare("SELECT content_hash, provider, model, vector FROM embeddings")?;

        let seeds = stmt
            .query_map([], |row| {
                let blob: Vec<u8> = row.get(3)?;
                Ok(CacheSeed {
                    fingerprint: Fingerprint {
                        content_hash: row.get(0)?,
                        provider: row.get(1)?,
                        model: row.get(2)?,
                    },
                    vector: blob_to_vector(&blob),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(seeds)
    }

    /// Entity ids passing all predicates, ascending
    ///
    /// An empty predicate set yields the full embedded population.
    pub fn filter_candidates(&self, predicates: &[Predicate], now: i64) -> Result<Vec<String>> {
        let conn = self.get_conn()?;

        if predicates.is_empty() {
            let mut stmt = conn.prepare("SELECT entity_id FROM embeddings ORDER BY entity_id")?;
            let ids = stmt
                .query_map([], |row| row.get(0))?
                .collect::<std::result::Result<Vec<String>, _>>()?;
            return Ok(ids);
        }

        let mut clauses = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        for predicate in predicates {
            match predicate {
                Predicate::GenderIs(gender) => {
                    clauses.push("p.gender = ?");
                    values.push(Value::Text(gender.clone()));
                }
                Predicate::AgeBucketIs(bucket) => {
                    clauses.push("p.age_bucket = ?");
                    values.push(Value::Text(bucket.clone()));
                }
                Predicate::HasCondition(condition) => {
                    clauses.push("instr(p.conditions, ?) > 0");
                    values.push(Value::Text(condition.clone()));
                }
                Predicate::VisitedWithinDays(days) => {
                    clauses.push("p.last_visit IS NOT NULL AND p.last_visit >= ?");
                    values.push(Value::Integer(now - days * 86_400));
                }
            }
        }

        let sql = format!(
            "SELECT e.entity_id FROM embeddings e
             JOIN patients p ON p.entity_id = e.entity_id
             WHERE {}
             ORDER BY e.entity_id",
            clauses.join(" AND ")
        );

        let mut stmt = conn.prepare(&sql)?;
        let ids = stmt
            .query_map(params_from_iter(values), |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;

        Ok(ids)
    }

    /// Nearest-neighbor primitive: cosine similarity of the query against
    /// each candidate's stored vector, descending, ties by ascending
    /// entity id, truncated to k.
    pub fn nearest_neighbors(
        &self,
        query: &[f32],
        candidate_ids: &[String],
        k: usize,
    ) -> Result<Vec<(String, f32)>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare("SELECT vector FROM embeddings WHERE entity_id = ?1")?;

        let mut scored = Vec::with_capacity(candidate_ids.len());
        for id in candidate_ids {
            let blob: Option<Vec<u8>> = stmt
                .query_row(params![id], |row| row.get(0))
                .optional()?;
            let Some(blob) = blob else { continue };

            let vector = blob_to_vector(&blob);
            if vector.len() != query.len() {
                return Err(EmbedError::Schema {
                    expected: vector.len(),
                    actual: query.len(),
                }
                .into());
            }

            scored.push((id.clone(), cosine_similarity(query, &vector)));
        }

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(k);

        Ok(scored)
    }

    /// Attribute rows for the given entity ids
    pub fn get_attributes(
        &self,
        entity_ids: &[String],
    ) -> Result<AHashMap<String, PatientAttributes>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT gender, age_bucket, conditions, last_visit
             FROM patients WHERE entity_id = ?1",
        )?;

        let mut out = AHashMap::new();
        for id in entity_ids {
            let attrs = stmt
                .query_row(params![id], |row| {
                    let conditions: String = row.get(2)?;
                    Ok(PatientAttributes {
                        entity_id: id.clone(),
                        gender: row.get(0)?,
                        age_bucket: row.get(1)?,
                        conditions: split_conditions(&conditions),
                        last_visit: row.get(3)?,
                    })
                })
                .optional()?;
            if let Some(attrs) = attrs {
                out.insert(id.clone(), attrs);
            }
        }

        Ok(out)
    }

    /// Seed or update patient attribute rows (orchestrator-side)
    pub fn upsert_patients(&self, patients: &[PatientAttributes]) -> Result<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO patients (entity_id, gender, age_bucket, conditions, last_visit)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(entity_id) DO UPDATE SET
                     gender = excluded.gender,
                     age_bucket = excluded.age_bucket,
                     conditions = excluded.conditions,
                     last_visit = excluded.last_visit",
            )?;

            for patient in patients {
                stmt.execute(params![
                    patient.entity_id,
                    patient.gender,
                    patient.age_bucket,
                    join_conditions(&patient.conditions),
                    patient.last_visit,
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Get store statistics
    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.get_conn()?;

        let patient_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM patients", [], |row| row.get(0))?;

        let embedding_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM embeddings", [], |row| row.get(0))?;

        Ok(StoreStats {
            patient_count: patient_count as usize,
            embedding_count: embedding_count as usize,
            dimension: self.collection_dimension()?,
        })
    }
}

/// Upsert outcome for one chunk commit
#[derive(Debug, Default, Clone, Copy)]
pub struct UpsertStats {
    pub written: usize,
    pub skipped: usize,
}

/// Store statistics
#[derive(Debug)]
pub struct StoreStats {
    pub patient_count: usize,
    pub embedding_count: usize,
    pub dimension: Option<usize>,
}

fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

fn blob_to_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity, i.e. 1 - cosine_distance. Zero-magnitude vectors
/// score 0.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    dot / (mag_a * mag_b)
}

fn join_conditions(conditions: &[String]) -> String {
    conditions
        .iter()
        .map(|c| c.trim().to_lowercase())
        .collect::<Vec<_>>()
        .join(",")
}

fn split_conditions(joined: &str) -> Vec<String> {
    joined
        .split(',')
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

/// Database migrations (each string is one migration)
const MIGRATIONS: &[&str] = &[
    // Migration 1: Initial schema
    r#"
    -- Collection provisioning record (single row)
    CREATE TABLE collection_meta (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        dimension INTEGER NOT NULL,
        provisioned_at INTEGER NOT NULL
    );

    -- Structured patient attributes for candidate narrowing
    CREATE TABLE patients (
        entity_id TEXT PRIMARY KEY,
        gender TEXT,
        age_bucket TEXT,
        conditions TEXT NOT NULL DEFAULT '',
        last_visit INTEGER
    );

    CREATE INDEX idx_patients_gender ON patients(gender);
    CREATE INDEX idx_patients_age_bucket ON patients(age_bucket);
    CREATE INDEX idx_patients_last_visit ON patients(last_visit);

    -- Embeddings with their source text, one row per entity
    CREATE TABLE embeddings (
        entity_id TEXT PRIMARY KEY,
        context_text TEXT NOT NULL,
        vector BLOB NOT NULL,
        content_hash TEXT NOT NULL,
        provider TEXT NOT NULL,
        model TEXT NOT NULL,
        created_at INTEGER NOT NULL
    );

    CREATE INDEX idx_embeddings_hash ON embeddings(content_hash);
    CREATE INDEX idx_embeddings_model ON embeddings(model);
    "#,
];
