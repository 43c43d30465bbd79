//! Remote batch-capable provider (OpenAI-style endpoint)
//!
//! The whole input list goes out in one call; the response carries an
//! index per vector, so results are reordered to input order and the
//! count is validated before returning.

use super::provider::{classify_request_error, classify_status, EmbedError, EmbeddingProvider};
use crate::config::ProviderConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}

/// Provider for a remote batch-capable embedding API
pub struct OpenAiProvider {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl OpenAiProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self, EmbedError> {
        if config.model.is_empty() {
            return Err(EmbedError::Configuration(
                "Model identifier cannot be empty".to_string(),
            ));
        }

        // Missing credential is a configuration fault, surfaced before any
        // network traffic happens.
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            EmbedError::Configuration(format!(
                "Environment variable {} is not set",
                config.api_key_env
            ))
        })?;
        if api_key.is_empty() {
            return Err(EmbedError::Configuration(format!(
                "Environment variable {} is empty",
                config.api_key_env
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EmbedError::Configuration(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key,
        })
    }
}

/// Reorder response items by index and validate positional correspondence
fn vectors_from_response(
    response: EmbeddingsResponse,
    want: usize,
) -> Result<Vec<Vec<f32>>, EmbedError> {
    if response.data.len() != want {
        return Err(EmbedError::CountMismatch {
            want,
            got: response.data.len(),
        });
    }

    let mut slots: Vec<Option<Vec<f32>>> = vec![None; want];
    for item in response.data {
        if item.index >= want || slots[item.index].is_some() {
            return Err(EmbedError::CountMismatch { want, got: want });
        }
        slots[item.index] = Some(item.embedding);
    }

    Ok(slots.into_iter().map(|slot| slot.unwrap_or_default()).collect())
}

#[async_trait]
impl EmbeddingProvider for OpenAiProvider {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if texts.iter().any(|t| t.is_empty()) {
            return Err(EmbedError::InvalidInput("Empty text in batch".to_string()));
        }

        let request = EmbeddingsRequest {
            model: &self.model,
            input: texts,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(classify_request_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let parsed: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|e| EmbedError::Transient(format!("Malformed response body: {}", e)))?;

        vectors_from_response(parsed, texts.len())
    }

    fn provider_id(&self) -> &str {
        "openai"
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_shape() {
        let input = vec!["first patient".to_string(), "second patient".to_string()];
        let request = EmbeddingsRequest {
            model: "text-embedding-3-small",
            input: &input,
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "text-embedding-3-small");
        assert_eq!(json["input"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_response_reordered_by_index() {
        let body = r#"{
            "data": [
                {"index": 1, "embedding": [2.0]},
                {"index": 0, "embedding": [1.0]},
                {"index": 2, "embedding": [3.0]}
            ]
        }"#;
        let parsed: EmbeddingsResponse = serde_json::from_str(body).unwrap();
        let vectors = vectors_from_response(parsed, 3).unwrap();

        assert_eq!(vectors, vec![vec![1.0], vec![2.0], vec![3.0]]);
    }

    #[test]
    fn test_response_count_mismatch() {
        let body = r#"{"data": [{"index": 0, "embedding": [1.0]}]}"#;
        let parsed: EmbeddingsResponse = serde_json::from_str(body).unwrap();
        let result = vectors_from_response(parsed, 2);

        assert!(matches!(
            result,
            Err(EmbedError::CountMismatch { want: 2, got: 1 })
        ));
    }

    #[test]
    fn test_response_duplicate_index_rejected() {
        let body = r#"{
            "data": [
                {"index": 0, "embedding": [1.0]},
                {"index": 0, "embedding": [2.0]}
            ]
        }"#;
        let parsed: EmbeddingsResponse = serde_json::from_str(body).unwrap();
        assert!(vectors_from_response(parsed, 2).is_err());
    }
}
