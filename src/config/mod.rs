//! Configuration management for Cohortix
//!
//! The core consumes configuration but does not own it: provider identity,
//! model, chunk sizing, and retry bounds are supplied here by the operator
//! and validated at load time.

use crate::error::{CohortixError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

mod validator;

pub use validator::ConfigValidator;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub storage: StorageConfig,
    pub provider: ProviderConfig,
    pub ingest: IngestConfig,
    pub search: SearchConfig,
    #[serde(default)]
    pub profiles: HashMap<String, ProfileOverrides>,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
    #[serde(default = "current_timestamp")]
    pub last_modified: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

/// Embedding provider configuration
///
/// `backend` selects the adapter variant: "ollama" (local, one text per
/// call) or "openai" (remote, whole batch per call). `dimension` pins the
/// collection width explicitly; when absent the width is discovered by
/// probe or from the first produced vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub backend: String,
    pub model: String,
    pub endpoint: String,
    pub api_key_env: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimension: Option<usize>,
    pub probe_on_start: bool,
    /// Per-call network timeout, independent of the retry ceiling
    pub timeout_secs: u64,
}

/// Ingestion pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Records per chunk (one retry/commit unit)
    pub chunk_size: usize,
    /// Retry ceiling for transient provider failures, per chunk
    pub max_retries: u32,
    /// Base delay for exponential backoff
    pub backoff_base_ms: u64,
    /// Bounded worker pool for concurrent chunk processing
    pub max_concurrent_chunks: usize,
}

/// Search configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Default number of results returned
    pub top_k: usize,
}

/// Profile-specific configuration overrides
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_backend: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<usize>,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(CohortixError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| CohortixError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        // Apply environment variable overrides
        config.apply_env_overrides();

        // Validate configuration
        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| CohortixError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Load configuration with a specific profile applied
    pub fn load_with_profile(path: &Path, profile: &str) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_profile(profile);
        Ok(config)
    }

    /// Apply a profile's overrides to the configuration
    pub fn apply_profile(&mut self, profile: &str) {
        if let Some(overrides) = self.profiles.get(profile).cloned() {
            if let Some(backend) = overrides.provider_backend {
                self.provider.backend = backend;
            }
            if let Some(model) = overrides.provider_model {
                self.provider.model = model;
            }
            if let Some(chunk_size) = overrides.chunk_size {
                self.ingest.chunk_size = chunk_size;
            }
        }
    }

    /// Apply environment variable overrides
    /// Environment variables in format: COHORTIX_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            if let Some(config_key) = key.strip_prefix("COHORTIX_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "PROVIDER__BACKEND" => {
                self.provider.backend = value.to_string();
            }
            "PROVIDER__MODEL" => {
                self.provider.model = value.to_string();
            }
            "PROVIDER__ENDPOINT" => {
                self.provider.endpoint = value.to_string();
            }
            "PROVIDER__DIMENSION" => {
                let dim = value.parse().map_err(|_| CohortixError::InvalidConfigValue {
                    path: path.to_string(),
                    message: format!("Cannot parse '{}' as integer", value),
                })?;
                self.provider.dimension = Some(dim);
            }
            "INGEST__CHUNK_SIZE" => {
                self.ingest.chunk_size =
                    value.parse().map_err(|_| CohortixError::InvalidConfigValue {
                        path: path.to_string(),
                        message: format!("Cannot parse '{}' as integer", value),
                    })?;
            }
            "SEARCH__TOP_K" => {
                self.search.top_k =
                    value.parse().map_err(|_| CohortixError::InvalidConfigValue {
                        path: path.to_string(),
                        message: format!("Cannot parse '{}' as integer", value),
                    })?;
            }
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| CohortixError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("cohortix").join("config.toml"))
    }

    /// Get the default data directory
    pub fn default_data_dir() -> Result<PathBuf> {
        let home_dir = dirs::home_dir()
            .ok_or_else(|| CohortixError::Config("Cannot determine home directory".to_string()))?;

        Ok(home_dir.join(".cohortix"))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            meta: MetaConfig {
                schema_version: "1.0.0".to_string(),
                created_at: current_timestamp(),
                last_modified: current_timestamp(),
            },
            storage: StorageConfig {
                data_dir: PathBuf::from("~/.cohortix"),
            },
            provider: ProviderConfig {
                backend: "ollama".to_string(),
                model: "nomic-embed-text".to_string(),
                endpoint: "http://localhost:11434/api/embed".to_string(),
                api_key_env: "OPENAI_API_KEY".to_string(),
                dimension: None,
                probe_on_start: true,
                timeout_secs: 30,
            },
            ingest: IngestConfig {
                chunk_size: 32,
                max_retries: 4,
                backoff_base_ms: 250,
                max_concurrent_chunks: 4,
            },
            search: SearchConfig { top_k: 10 },
            profiles: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_roundtrip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");

        let config = Config::default();
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.provider.backend, "ollama");
        assert_eq!(loaded.ingest.chunk_size, 32);
        assert_eq!(loaded.search.top_k, 10);
    }

    #[test]
    fn test_missing_file() {
        let result = Config::load(Path::new("/nonexistent/config.toml"));
        assert!(matches!(result, Err(CohortixError::ConfigNotFound { .. })));
    }

    #[test]
    fn test_profile_overrides() {
        let mut config = Config::default();
        config.profiles.insert(
            "remote".to_string(),
            ProfileOverrides {
                provider_backend: Some("openai".to_string()),
                provider_model: Some("text-embedding-3-small".to_string()),
                chunk_size: Some(64),
            },
        );

        config.apply_profile("remote");
        assert_eq!(config.provider.backend, "openai");
        assert_eq!(config.provider.model, "text-embedding-3-small");
        assert_eq!(config.ingest.chunk_size, 64);
    }
}
