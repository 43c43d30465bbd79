use crate::config::Config;
use crate::error::{CohortixError, Result, ValidationError};

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_storage(config, &mut errors);
        Self::validate_provider(config, &mut errors);
        Self::validate_ingest(config, &mut errors);
        Self::validate_search(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(CohortixError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != "1.0.0" {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_storage(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.storage.data_dir.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.data_dir",
                "Data directory path cannot be empty",
            ));
        }
    }

    fn validate_provider(config: &Config, errors: &mut Vec<ValidationError>) {
        let backend = &config.provider.backend;
        let valid_backends = ["ollama", "openai"];
        if !valid_backends.contains(&backend.as_str()) {
            errors.push(ValidationError::new(
                "provider.backend",
                format!(
                    "Backend must be one of {:?}, got '{}'",
                    valid_backends, backend
                ),
            ));
        }

        if config.provider.model.is_empty() {
            errors.push(ValidationError::new(
                "provider.model",
                "Model name cannot be empty",
            ));
        }

        if config.provider.endpoint.is_empty() {
            errors.push(ValidationError::new(
                "provider.endpoint",
                "Endpoint cannot be empty",
            ));
        }

        if let Some(dim) = config.provider.dimension {
            if dim == 0 {
                errors.push(ValidationError::new(
                    "provider.dimension",
                    "Vector dimension must be greater than 0",
                ));
            }
        }

        if config.provider.timeout_secs == 0 {
            errors.push(ValidationError::new(
                "provider.timeout_secs",
                "Network timeout must be greater than 0",
            ));
        }

        // The remote backend needs a credential; checked here so a bad
        // deployment fails at load time rather than mid-ingestion.
        if backend == "openai" {
            let env_var = &config.provider.api_key_env;
            match std::env::var(env_var) {
                Ok(key) if key.is_empty() => {
                    errors.push(ValidationError::new(
                        "provider.api_key_env",
                        format!("Environment variable {} is empty", env_var),
                    ));
                }
                Err(_) => {
                    errors.push(ValidationError::new(
                        "provider.api_key_env",
                        format!("Environment variable {} is not set", env_var),
                    ));
                }
                Ok(_) => {}
            }
        }
    }

    fn validate_ingest(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.ingest.chunk_size == 0 {
            errors.push(ValidationError::new(
                "ingest.chunk_size",
                "Chunk size must be greater than 0",
            ));
        }

        if config.ingest.backoff_base_ms == 0 {
            errors.push(ValidationError::new(
                "ingest.backoff_base_ms",
                "Backoff base delay must be greater than 0",
            ));
        }

        if config.ingest.max_concurrent_chunks == 0 {
            errors.push(ValidationError::new(
                "ingest.max_concurrent_chunks",
                "Concurrency bound must be greater than 0",
            ));
        }
    }

    fn validate_search(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.search.top_k == 0 {
            errors.push(ValidationError::new(
                "search.top_k",
                "top_k must be greater than 0",
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_config() {
        let config = Config::default();
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_invalid_backend() {
        let mut config = Config::default();
        config.provider.backend = "invalid".to_string();
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_zero_chunk_size() {
        let mut config = Config::default();
        config.ingest.chunk_size = 0;
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_zero_dimension_rejected() {
        let mut config = Config::default();
        config.provider.dimension = Some(0);
        assert!(ConfigValidator::validate(&config).is_err());
    }
}
