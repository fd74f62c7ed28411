use async_trait::async_trait;
use log::{debug, warn};
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::backend::EmbeddingBackend;
use crate::config::RemoteConfig;
use crate::error::{EmbeddingError, Result};

/// Embeddings from an OpenAI-compatible `/embeddings` endpoint.
///
/// Rate limits, server errors and connection failures are retried with
/// exponential backoff up to `max_attempts` total attempts.
pub struct RemoteEmbedder {
    client: reqwest::Client,
    endpoint: String,
    config: RemoteConfig,
    dimensions: Option<usize>,
}

impl RemoteEmbedder {
    pub fn new(config: RemoteConfig, dimension: usize) -> Result<Self> {
        let api_key = match &config.api_key {
            Some(key) => key.clone(),
            None => std::env::var(&config.api_key_env).map_err(|_| {
                EmbeddingError::ModelInitialization(format!(
                    "missing API key: set {} or remote.api_key",
                    config.api_key_env
                ))
            })?,
        };
        if api_key.trim().is_empty() {
            return Err(EmbeddingError::ModelInitialization(
                "missing API key".to_string(),
            ));
        }

        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("Bearer {}", api_key.trim()))
            .map_err(|e| EmbeddingError::InvalidConfig(format!("invalid API key: {e}")))?;
        headers.insert(AUTHORIZATION, auth);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .default_headers(headers)
            .build()
            .map_err(|e| {
                EmbeddingError::ModelInitialization(format!("failed to build HTTP client: {e}"))
            })?;

        let endpoint = format!("{}/embeddings", config.base_url.trim_end_matches('/'));
        let dimensions = config.request_dimensions.then_some(dimension);

        Ok(Self {
            client,
            endpoint,
            config,
            dimensions,
        })
    }

    fn retry_backoff(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1).min(5) as u32;
        Duration::from_millis(self.config.initial_backoff_ms.saturating_mul(1 << exponent))
    }

    async fn send_once(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, Attempt> {
        let request = EmbeddingRequest {
            model: &self.config.model,
            input: texts,
            dimensions: self.dimensions,
        };

        let response = match self.client.post(&self.endpoint).json(&request).send().await {
            Ok(response) => response,
            Err(err) if is_retryable_error(&err) => return Err(Attempt::Transient(err.to_string())),
            Err(err) => {
                return Err(Attempt::Fatal(EmbeddingError::EmbeddingGeneration(
                    err.to_string(),
                )));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            if should_retry(status) {
                return Err(Attempt::Transient(format!("{status}: {body}")));
            }
            return Err(Attempt::Fatal(EmbeddingError::Request {
                status: status.as_u16(),
                body,
            }));
        }

        let mut parsed: EmbeddingResponse = response.json().await.map_err(|e| {
            Attempt::Fatal(EmbeddingError::EmbeddingGeneration(format!(
                "failed to parse embedding response: {e}"
            )))
        })?;

        parsed.data.sort_by_key(|entry| entry.index);
        if parsed.data.len() != texts.len() {
            return Err(Attempt::Fatal(EmbeddingError::EmbeddingGeneration(format!(
                "API returned {} embeddings for {} inputs",
                parsed.data.len(),
                texts.len()
            ))));
        }

        Ok(parsed.data.into_iter().map(|entry| entry.embedding).collect())
    }
}

enum Attempt {
    Transient(String),
    Fatal(EmbeddingError),
}

fn should_retry(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

#[async_trait]
impl EmbeddingBackend for RemoteEmbedder {
    fn name(&self) -> &'static str {
        "remote"
    }

    fn max_batch_size(&self) -> usize {
        self.config.batch_size
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            debug!(
                "Embedding request for {} texts (attempt {attempt}/{max_attempts})",
                texts.len()
            );

            match self.send_once(texts).await {
                Ok(vectors) => return Ok(vectors),
                Err(Attempt::Fatal(err)) => return Err(err),
                Err(Attempt::Transient(last_error)) if attempt >= max_attempts => {
                    return Err(EmbeddingError::RetriesExhausted {
                        attempts: attempt,
                        last_error,
                    });
                }
                Err(Attempt::Transient(reason)) => {
                    let delay = self.retry_backoff(attempt);
                    warn!("Transient embedding failure ({reason}), retrying in {delay:?}");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}
