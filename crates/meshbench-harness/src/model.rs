//! Model-client boundary.
//!
//! The engine treats the model as an opaque source-text generator: a
//! prompt goes in, source text comes out, and failures are either
//! unavailability or timeout. Nothing here inspects model internals.

use async_trait::async_trait;
use meshbench_core::domain::{HarnessError, Result};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};

/// Opaque generation boundary.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Generate handler source text for a prompt.
    async fn generate(&self, model: &str, prompt: &str) -> Result<String>;
}

/// Client for an Ollama-compatible `/api/generate` endpoint.
pub struct OllamaClient {
    host: String,
    http: reqwest::Client,
    request_timeout: Duration,
}

impl OllamaClient {
    /// Client against an explicit host, e.g. `http://localhost:11434`.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            http: reqwest::Client::new(),
            request_timeout: Duration::from_secs(120),
        }
    }

    /// Host from `OLLAMA_HOST`, defaulting to the local daemon.
    pub fn from_env() -> Self {
        let host = std::env::var("OLLAMA_HOST")
            .unwrap_or_else(|_| "http://localhost:11434".to_string());
        Self::new(host)
    }

    /// Override the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

#[async_trait]
impl ModelClient for OllamaClient {
    async fn generate(&self, model: &str, prompt: &str) -> Result<String> {
        let url = format!("{}/api/generate", self.host.trim_end_matches('/'));
        debug!(model, url = %url, prompt_len = prompt.len(), "requesting generation");

        let body = json!({
            "model": model,
            "prompt": prompt,
            "stream": false,
            "options": {
                "temperature": 0.3,
                "num_predict": 2048,
            },
        });

        let response = self
            .http
            .post(&url)
            .timeout(self.request_timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    HarnessError::ModelTimeout(self.request_timeout.as_secs())
                } else {
                    HarnessError::ModelUnavailable(e.to_string())
                }
            })?
            .error_for_status()
            .map_err(|e| HarnessError::ModelUnavailable(e.to_string()))?;

        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| HarnessError::ModelUnavailable(format!("malformed response: {e}")))?;

        let text = value["response"].as_str().unwrap_or_default().to_string();
        info!(model, generated_len = text.len(), "generation finished");
        Ok(text)
    }
}

/// Extract handler source from a model response: the first fenced
/// Python block when present, the whole response otherwise.
pub fn extract_code(response: &str) -> String {
    if let Some(start) = response.find("```python") {
        let after = start + "```python".len();
        if let Some(end) = response[after..].find("```") {
            return response[after..after + end].trim().to_string();
        }
        // Unterminated fence: take everything after it.
        return response[after..].trim().to_string();
    }
    response.trim().to_string()
}
