//! HTTP client for a llama.cpp-compatible completion server.
//!
//! Talks to `llama-server` (or anything exposing the same API): prompts go to
//! `POST /completion` and the answer is read from the `content` field.

use crate::inference::{CompletionFuture, CompletionModel, GenerationParams, ModelError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Completion server location.
#[derive(Debug, Clone)]
pub struct LlamaConfig {
    /// Base URL, e.g. `http://127.0.0.1:8080`
    pub base_url: String,
    pub timeout: Duration,
}

impl LlamaConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn completion_url(&self) -> String {
        format!("{}/completion", self.base_url)
    }

    pub fn health_url(&self) -> String {
        format!("{}/health", self.base_url)
    }
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    prompt: &'a str,
    n_predict: u32,
    temperature: f64,
    top_p: f64,
    stop: &'a [String],
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    content: String,
}

pub struct LlamaClient {
    config: LlamaConfig,
    client: reqwest::Client,
}

impl LlamaClient {
    pub fn new(config: LlamaConfig) -> Result<Self, ModelError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ModelError::Unavailable(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &LlamaConfig {
        &self.config
    }

    /// Probe the server's health endpoint.
    pub async fn test_connection(&self) -> Result<bool, ModelError> {
        let response = self
            .client
            .get(self.config.health_url())
            .send()
            .await
            .map_err(|e| ModelError::Request(e.to_string()))?;

        Ok(response.status().is_success())
    }

    async fn request(&self, prompt: &str, params: &GenerationParams) -> Result<String, ModelError> {
        let body = CompletionRequest {
            prompt,
            n_predict: params.max_tokens,
            temperature: params.temperature,
            top_p: params.top_p,
            stop: &params.stop,
        };

        let response = self
            .client
            .post(self.config.completion_url())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    ModelError::Unavailable(e.to_string())
                } else {
                    ModelError::Request(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ModelError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let completion: CompletionResponse = response
            .json()
            .await
            .map_err(|e| ModelError::Decode(e.to_string()))?;

        Ok(completion.content)
    }
}

impl CompletionModel for LlamaClient {
    fn name(&self) -> &str {
        &self.config.base_url
    }

    fn complete<'a>(
        &'a self,
        prompt: &'a str,
        params: &'a GenerationParams,
    ) -> CompletionFuture<'a> {
        Box::pin(self.request(prompt, params))
    }
}
