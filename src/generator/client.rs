// The one place that talks to the text-generation service.
// It speaks the Ollama `/api/generate` protocol: `{model, prompt, stream}` in,
// a single `{response}` object out when `stream = false`. Requests are bounded
// by the configured timeout and never retried here.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::GenerationConfig;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Generation service unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, GenerationError>;

/// Anything that turns a prompt into free text
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str, model: &str) -> Result<String>;
}

/// Body of one generation call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationRequest {
    pub model: String,
    pub prompt: String,
    pub stream: bool,
}

impl GenerationRequest {
    pub fn new(prompt: &str, model: &str) -> Self {
        GenerationRequest {
            model: model.to_string(),
            prompt: prompt.to_string(),
            stream: false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GenerationResponse {
    response: String,
}

/// HTTP client for an Ollama-compatible service
#[derive(Debug, Clone)]
pub struct GenerationClient {
    client: reqwest::Client,
    endpoint: String,
}

impl GenerationClient {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GenerationError::Unavailable(format!("HTTP client: {}", e)))?;

        Ok(GenerationClient {
            client,
            endpoint: format!("{}/api/generate", config.service_url.trim_end_matches('/')),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl TextGenerator for GenerationClient {
    async fn generate(&self, prompt: &str, model: &str) -> Result<String> {
        let request = GenerationRequest::new(prompt, model);
        debug!(endpoint = %self.endpoint, model, prompt_chars = prompt.len(), "sending generation request");

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                let reason = if e.is_timeout() { "timed out" } else { "request failed" };
                warn!(endpoint = %self.endpoint, error = %e, "generation {}", reason);
                GenerationError::Unavailable(format!("{} {}: {}", self.endpoint, reason, e))
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| GenerationError::Unavailable(format!("reading response body: {}", e)))?;

        if !status.is_success() {
            return Err(GenerationError::Unavailable(format!(
                "service answered {}: {}",
                status,
                crate::utils::truncate_chars(body.trim(), 300)
            )));
        }

        let parsed: GenerationResponse = serde_json::from_str(&body).map_err(|e| {
            GenerationError::Unavailable(format!("malformed service response: {}", e))
        })?;

        debug!(response_chars = parsed.response.len(), "generation complete");
        Ok(parsed.response)
    }
}
