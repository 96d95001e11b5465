
use anyhow::{Context, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::config::Config;
use crate::embeddings::ollama::{build_agent, request_with_retry};
use crate::generation::GenerationProvider;
use crate::{RagError, Result};

// Generation is the slowest hop in the pipeline; give it more room than the
// embedding client before timing out.
const DEFAULT_TIMEOUT_SECONDS: u64 = 120;
const DEFAULT_RETRY_ATTEMPTS: u32 = 2;

/// Completion client for an Ollama-compatible `/api/generate` endpoint.
#[derive(Debug)]
pub struct OllamaGenerator {
    base_url: Url,
    model: String,
    temperature: f32,
    max_tokens: u32,
    agent: ureq::Agent,
    retry_attempts: u32,
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

impl OllamaGenerator {
    #[inline]
    pub fn new(config: &Config) -> Result<Self> {
        let base_url = config
            .generation_url()
            .map_err(|e| RagError::Config(e.to_string()))?;

        Ok(Self {
            base_url,
            model: config.generation.model.clone(),
            temperature: config.generation.temperature,
            max_tokens: config.generation.max_tokens,
            agent: build_agent(Duration::from_secs(DEFAULT_TIMEOUT_SECONDS)),
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
        })
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = build_agent(timeout);
        self
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }
}

#[async_trait]
impl GenerationProvider for OllamaGenerator {
    #[inline]
    async fn generate(&self, prompt: &str) -> Result<String> {
        debug!(
            "Requesting completion from '{}' for a {}-byte prompt",
            self.model,
            prompt.len()
        );

        let request = GenerateRequest {
            model: self.model.clone(),
            prompt: prompt.to_string(),
            stream: false,
            options: GenerateOptions {
                temperature: self.temperature,
                num_predict: self.max_tokens,
            },
        };

        let url = self
            .base_url
            .join("/api/generate")
            .context("Failed to build generation URL")?;

        let body =
            serde_json::to_string(&request).context("Failed to serialize generation request")?;

        let agent = self.agent.clone();
        let attempts = self.retry_attempts;
        let response_text = tokio::task::spawn_blocking(move || {
            request_with_retry(
                || {
                    agent
                        .post(url.as_str())
                        .header("Content-Type", "application/json")
                        .send(&body)
                        .and_then(|mut resp| resp.body_mut().read_to_string())
                },
                attempts,
                "generation request",
            )
        })
        .await
        .map_err(|e| RagError::Internal(anyhow!("Generation task panicked: {e}")))??;

        let response: GenerateResponse = serde_json::from_str(&response_text).map_err(|e| {
            RagError::ProviderUnavailable(format!("Malformed generation response: {e}"))
        })?;

        Ok(response.response.trim().to_string())
    }
}
