//! Local single-item provider (Ollama-style endpoint)
//!
//! The backend accepts one text per call, so the adapter fans out one
//! HTTP request per input and reassembles the vectors in input order.

use super::provider::{classify_request_error, classify_status, EmbedError, EmbeddingProvider};
use crate::config::ProviderConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

/// Provider for a local embedding server with no native batching
pub struct OllamaProvider {
    client: reqwest::Client,
    endpoint: String,
    model: String,
}

impl OllamaProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self, EmbedError> {
        if config.model.is_empty() {
            return Err(EmbedError::Configuration(
                "Model identifier cannot be empty".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EmbedError::Configuration(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
        })
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let request = EmbedRequest {
            model: &self.model,
            input: text,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(classify_request_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| EmbedError::Transient(format!("Malformed response body: {}", e)))?;

        if parsed.embedding.is_empty() {
            return Err(EmbedError::Transient(
                "Provider returned an empty embedding".to_string(),
            ));
        }

        Ok(parsed.embedding)
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.iter().any(|t| t.is_empty()) {
            return Err(EmbedError::InvalidInput("Empty text in batch".to_string()));
        }

        // Sequential fan-out keeps positional correspondence trivially
        // correct and avoids hammering a local single-threaded server.
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed_one(text).await?);
        }

        Ok(vectors)
    }

    fn provider_id(&self) -> &str {
        "ollama"
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}
