//! Content-addressed embedding cache
//!
//! Memoizes computed vectors under (content hash, provider, model). A
//! provider or model change produces a different key by construction, so
//! entries never need invalidation. The cache treats the hash as an
//! opaque digest; normalization happens in the caller before hashing.

use ahash::AHashMap;
use std::sync::{Arc, Mutex};

/// Cache key: content hash plus the provider/model that computed the vector
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub content_hash: String,
    pub provider_id: String,
    pub model_id: String,
}

impl CacheKey {
    pub fn new(
        content_hash: impl Into<String>,
        provider_id: impl Into<String>,
        model_id: impl Into<String>,
    ) -> Self {
        Self {
            content_hash: content_hash.into(),
            provider_id: provider_id.into(),
            model_id: model_id.into(),
        }
    }
}

/// In-memory vector memo shared across chunks of a run
///
/// The single lock serializes reads and writes, which also satisfies the
/// per-key serialization requirement for concurrent chunk processing.
pub struct EmbeddingCache {
    entries: Mutex<AHashMap<CacheKey, Arc<Vec<f32>>>>,
}

impl EmbeddingCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(AHashMap::new()),
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<Arc<Vec<f32>>> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    pub fn put(&self, key: CacheKey, vector: Vec<f32>) {
        self.entries.lock().unwrap().insert(key, Arc::new(vector));
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EmbeddingCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Normalize text before hashing: trim, collapse internal whitespace,
/// lowercase. Keeps the digest stable across formatting noise in source
/// records.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Deterministic, collision-resistant digest of normalized text
pub fn content_hash(text: &str) -> String {
    blake3::hash(normalize_text(text).as_bytes())
        .to_hex()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_roundtrip() {
        let cache = EmbeddingCache::new();
        let key = CacheKey::new("abc", "ollama", "nomic-embed-text");

        assert!(cache.get(&key).is_none());

        cache.put(key.clone(), vec![0.1, 0.2]);
        assert_eq!(cache.get(&key).unwrap().as_slice(), &[0.1, 0.2]);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_model_change_is_a_new_key() {
        let cache = EmbeddingCache::new();
        let hash = content_hash("82 year old woman with atrial fibrillation");

        cache.put(
            CacheKey::new(hash.clone(), "openai", "text-embedding-3-small"),
            vec![1.0],
        );
        cache.put(
            CacheKey::new(hash.clone(), "openai", "text-embedding-3-large"),
            vec![2.0],
        );

        // Identical text under two model identifiers: two distinct entries
        assert_eq!(cache.len(), 2);
        let small = CacheKey::new(hash.clone(), "openai", "text-embedding-3-small");
        assert_eq!(cache.get(&small).unwrap().as_slice(), &[1.0]);
    }

    #[test]
    fn test_provider_change_is_a_new_key() {
        let cache = EmbeddingCache::new();
        let hash = content_hash("same text");

        cache.put(CacheKey::new(hash.clone(), "ollama", "m"), vec![1.0]);
        cache.put(CacheKey::new(hash, "openai", "m"), vec![2.0]);

        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_normalization_stability() {
        let a = content_hash("  67 year old   woman\nwith hypertension ");
        let b = content_hash("67 Year Old Woman With Hypertension");
        assert_eq!(a, b);

        let c = content_hash("67 year old man with hypertension");
        assert_ne!(a, c);
    }
}
