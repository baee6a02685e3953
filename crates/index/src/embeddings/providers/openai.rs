//! OpenAI-compatible embedding provider.
//!
//! Calls `POST {base_url}/embeddings` with a batch of inputs. Any service that
//! speaks the same protocol can be used by setting `OPENAI_BASE_URL`.
//!
//! Failures are classified so the client can decide whether to retry:
//! - 408 and client-side timeouts: timeout
//! - 429: rate-limited
//! - 5xx and connection errors: unavailable
//! - 401/403: auth
//! - other 4xx, undecodable bodies, wrong counts or dimensions: malformed

use async_trait::async_trait;
use libris_core::config::EmbeddingSettings;
use libris_core::{AppError, AppResult, EmbeddingErrorKind};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};

use crate::embeddings::EmbeddingProvider;

const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";
const EMBEDDING_ENDPOINT: &str = "/embeddings";

/// OpenAI embedding provider.
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    dimensions: usize,
}

#[derive(Debug, Serialize)]
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

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

impl OpenAiProvider {
    /// Create a provider from settings.
    ///
    /// # Errors
    /// * `AppError::Config` - if the API key is missing or the HTTP client cannot be built
    pub fn new(settings: &EmbeddingSettings) -> AppResult<Self> {
        let api_key = settings
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                AppError::Config(
                    "API key not found in environment variable: OPENAI_API_KEY".to_string(),
                )
            })?
            .to_string();

        let client = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs.max(1)))
            .build()
            .map_err(|e| AppError::Config(format!("Failed to create HTTP client: {}", e)))?;

        let base_url = settings
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_OPENAI_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            client,
            base_url,
            api_key,
            model: settings.model.clone(),
            dimensions: settings.dimensions,
        })
    }

    /// Only the v3 models accept a `dimensions` parameter.
    fn requested_dimensions(&self) -> Option<usize> {
        self.model
            .starts_with("text-embedding-3")
            .then_some(self.dimensions)
    }
}

/// Map an HTTP status onto an embedding error kind.
pub(crate) fn classify_status(status: StatusCode) -> EmbeddingErrorKind {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => EmbeddingErrorKind::Auth,
        StatusCode::TOO_MANY_REQUESTS => EmbeddingErrorKind::RateLimited,
        StatusCode::REQUEST_TIMEOUT => EmbeddingErrorKind::Timeout,
        s if s.is_server_error() => EmbeddingErrorKind::Unavailable,
        _ => EmbeddingErrorKind::Malformed,
    }
}

fn classify_transport(err: &reqwest::Error) -> EmbeddingErrorKind {
    if err.is_timeout() {
        EmbeddingErrorKind::Timeout
    } else if err.is_decode() {
        EmbeddingErrorKind::Malformed
    } else {
        EmbeddingErrorKind::Unavailable
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiProvider {
    fn provider_name(&self) -> &str {
        "openai"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    #[instrument(skip(self, texts), fields(batch_size = texts.len(), provider = "openai", model = %self.model))]
    async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let url = format!("{}{}", self.base_url, EMBEDDING_ENDPOINT);
        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
            dimensions: self.requested_dimensions(),
        };

        debug!("Sending embedding request to {}", url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                AppError::embedding(
                    classify_transport(&e),
                    format!("Request to {} failed: {}", url, e),
                )
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            let message = serde_json::from_str::<ErrorResponse>(&error_text)
                .map(|r| r.error.message)
                .unwrap_or(error_text);

            return Err(AppError::embedding(
                classify_status(status),
                format!("Embedding API error ({}): {}", status, message),
            ));
        }

        let body: EmbeddingResponse = response.json().await.map_err(|e| {
            AppError::embedding(
                EmbeddingErrorKind::Malformed,
                format!("Failed to parse embedding response: {}", e),
            )
        })?;

        let mut data = body.data;
        data.sort_by_key(|d| d.index);

        if data.len() != texts.len() {
            return Err(AppError::embedding(
                EmbeddingErrorKind::Malformed,
                format!(
                    "Embedding response has {} vectors for {} inputs",
                    data.len(),
                    texts.len()
                ),
            ));
        }

        debug!("Received {} embeddings", data.len());

        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> EmbeddingSettings {
        EmbeddingSettings {
            api_key: Some("sk-test".to_string()),
            base_url: Some("http://localhost:9/v1/".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_classify_status() {
        assert_eq!(
            classify_status(StatusCode::UNAUTHORIZED),
            EmbeddingErrorKind::Auth
        );
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            EmbeddingErrorKind::RateLimited
        );
        assert_eq!(
            classify_status(StatusCode::BAD_GATEWAY),
            EmbeddingErrorKind::Unavailable
        );
        assert_eq!(
            classify_status(StatusCode::BAD_REQUEST),
            EmbeddingErrorKind::Malformed
        );
        assert!(!classify_status(StatusCode::BAD_REQUEST).is_transient());
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let provider = OpenAiProvider::new(&settings()).unwrap();
        assert_eq!(provider.base_url, "http://localhost:9/v1");
        assert_eq!(provider.requested_dimensions(), Some(1536));
    }

    #[test]
    fn test_legacy_model_omits_dimensions() {
        let mut settings = settings();
        settings.model = "text-embedding-ada-002".to_string();
        let provider = OpenAiProvider::new(&settings).unwrap();
        assert_eq!(provider.requested_dimensions(), None);
    }

    #[test]
    fn test_blank_key_rejected() {
        let mut settings = settings();
        settings.api_key = Some("   ".to_string());
        assert!(matches!(
            OpenAiProvider::new(&settings),
            Err(AppError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_service_is_unavailable() {
        // Port 9 (discard) is not expected to accept HTTP connections
        let provider = OpenAiProvider::new(&settings()).unwrap();
        let err = provider
            .embed_batch(&["hello".to_string()])
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }
}
