//! Embedding generation
//!
//! Architecture:
//! - EmbeddingProvider trait hiding backend heterogeneity
//! - OllamaProvider for a local, one-text-per-call backend
//! - OpenAiProvider for a remote, batch-capable backend
//! - DimensionAdvisor fixing the collection's vector width
//! - EmbeddingCache memoizing vectors by content hash

mod cache;
mod dimension;
mod ollama;
mod openai;
mod provider;

pub use cache::{content_hash, normalize_text, CacheKey, EmbeddingCache};
pub use dimension::{DimensionAdvisor, DimensionSource};
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;
pub use provider::{EmbedError, EmbeddingProvider};

use crate::config::ProviderConfig;
use std::sync::Arc;

/// Build the provider variant selected by configuration
pub fn create_provider(config: &ProviderConfig) -> Result<Arc<dyn EmbeddingProvider>, EmbedError> {
    match config.backend.as_str() {
        "ollama" => Ok(Arc::new(OllamaProvider::new(config)?)),
        "openai" => Ok(Arc::new(OpenAiProvider::new(config)?)),
        other => Err(EmbedError::Configuration(format!(
            "Unsupported backend: {}. Supported: ollama, openai",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn test_unknown_backend_rejected() {
        let mut provider_config = Config::default().provider;
        provider_config.backend = "word2vec".to_string();

        let result = create_provider(&provider_config);
        assert!(matches!(result, Err(EmbedError::Configuration(_))));
    }

    #[test]
    fn test_local_backend_constructs_without_credential() {
        let provider_config = Config::default().provider;
        let provider = create_provider(&provider_config).unwrap();
        assert_eq!(provider.provider_id(), "ollama");
        assert_eq!(provider.model_id(), "nomic-embed-text");
    }
}
