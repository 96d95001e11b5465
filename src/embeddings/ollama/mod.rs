
use anyhow::{Context, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, error, warn};
use url::Url;

use crate::config::Config;
use crate::embeddings::EmbeddingProvider;
use crate::{RagError, Result};

const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const EXPONENTIAL_BACKOFF_BASE: u64 = 2;

/// Short input used to probe the model's output dimension on first use.
const DIMENSION_PROBE_TEXT: &str = "dimension probe";

/// Embedding client for an Ollama-compatible `/api/embed` endpoint.
#[derive(Debug)]
pub struct OllamaEmbedder {
    base_url: Url,
    model: String,
    batch_size: usize,
    agent: ureq::Agent,
    retry_attempts: u32,
    /// Probed once per process; concurrent first calls share the probe.
    dimension: OnceCell<usize>,
}

#[derive(Debug, Serialize)]
struct EmbedRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl OllamaEmbedder {
    #[inline]
    pub fn new(config: &Config) -> Result<Self> {
        let base_url = config
            .embedding_url()
            .map_err(|e| RagError::Config(e.to_string()))?;

        Ok(Self {
            base_url,
            model: config.embedding.model.clone(),
            batch_size: config.embedding.batch_size as usize,
            agent: build_agent(Duration::from_secs(DEFAULT_TIMEOUT_SECONDS)),
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            dimension: OnceCell::new(),
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

    /// Check that the embedding server is reachable.
    #[inline]
    pub async fn ping(&self) -> Result<()> {
        let url = self
            .base_url
            .join("/api/tags")
            .context("Failed to build ping URL")?;

        debug!("Pinging embedding server at {}", url);
        self.dispatch_get(url).await?;
        Ok(())
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = EmbedRequest {
            model: self.model.clone(),
            input: texts.to_vec(),
        };

        let url = self
            .base_url
            .join("/api/embed")
            .context("Failed to build embedding URL")?;

        let body =
            serde_json::to_string(&request).context("Failed to serialize embedding request")?;

        let response_text = self.dispatch_post(url, body).await?;

        let response: EmbedResponse = serde_json::from_str(&response_text).map_err(|e| {
            RagError::ProviderUnavailable(format!("Malformed embedding response: {e}"))
        })?;

        if response.embeddings.len() != texts.len() {
            return Err(RagError::ProviderUnavailable(format!(
                "Embedding count mismatch: sent {} texts, received {} vectors",
                texts.len(),
                response.embeddings.len()
            )));
        }

        Ok(response.embeddings)
    }

    /// Run a blocking POST on the blocking pool so slow provider calls do
    /// not stall the async runtime.
    async fn dispatch_post(&self, url: Url, body: String) -> Result<String> {
        let agent = self.agent.clone();
        let attempts = self.retry_attempts;
        tokio::task::spawn_blocking(move || {
            request_with_retry(
                || {
                    agent
                        .post(url.as_str())
                        .header("Content-Type", "application/json")
                        .send(&body)
                        .and_then(|mut resp| resp.body_mut().read_to_string())
                },
                attempts,
                "embedding request",
            )
        })
        .await
        .map_err(|e| RagError::Internal(anyhow!("Embedding task panicked: {e}")))?
    }

    async fn dispatch_get(&self, url: Url) -> Result<String> {
        let agent = self.agent.clone();
        let attempts = self.retry_attempts;
        tokio::task::spawn_blocking(move || {
            request_with_retry(
                || {
                    agent
                        .get(url.as_str())
                        .call()
                        .and_then(|mut resp| resp.body_mut().read_to_string())
                },
                attempts,
                "embedding server ping",
            )
        })
        .await
        .map_err(|e| RagError::Internal(anyhow!("Embedding task panicked: {e}")))?
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedder {
    #[inline]
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Generating embeddings for {} texts", texts.len());

        let mut results = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size.max(1)) {
            let vectors = self
                .embed_batch(batch)
                .await
                .inspect_err(|e| error!("Embedding batch of {} texts failed: {}", batch.len(), e))?;
            results.extend(vectors);
        }

        debug!("Generated {} embeddings", results.len());
        Ok(results)
    }

    #[inline]
    async fn dimension(&self) -> Result<usize> {
        self.dimension
            .get_or_try_init(|| async {
                debug!("Probing embedding model '{}' for its dimension", self.model);
                let vectors = self.embed_batch(&[DIMENSION_PROBE_TEXT.to_string()]).await?;
                let dim = vectors
                    .first()
                    .map(Vec::len)
                    .filter(|d| *d > 0)
                    .ok_or_else(|| {
                        RagError::ProviderUnavailable(
                            "Embedding model returned an empty probe vector".to_string(),
                        )
                    })?;
                debug!("Embedding model '{}' produces {}-dim vectors", self.model, dim);
                Ok(dim)
            })
            .await
            .copied()
    }
}

pub(crate) fn build_agent(timeout: Duration) -> ureq::Agent {
    ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build()
        .into()
}

/// Retry transient failures with exponential backoff. Server errors (5xx)
/// and transport errors retry; client errors (4xx) fail fast.
pub(crate) fn request_with_retry<F>(
    mut request_fn: F,
    attempts: u32,
    what: &str,
) -> Result<String>
where
    F: FnMut() -> std::result::Result<String, ureq::Error>,
{
    let mut last_error = None;

    for attempt in 1..=attempts {
        match request_fn() {
            Ok(response_text) => return Ok(response_text),
            Err(error) => {
                let should_retry = match &error {
                    ureq::Error::StatusCode(status) => {
                        if *status >= 500 {
                            warn!("{} got server error {} (attempt {}/{})", what, status, attempt, attempts);
                            true
                        } else {
                            return Err(RagError::ProviderUnavailable(format!(
                                "{what} rejected with HTTP {status}"
                            )));
                        }
                    }
                    ureq::Error::ConnectionFailed
                    | ureq::Error::HostNotFound
                    | ureq::Error::Timeout(_)
                    | ureq::Error::Io(_) => {
                        warn!("{} transport error: {} (attempt {}/{})", what, error, attempt, attempts);
                        true
                    }
                    _ => {
                        return Err(RagError::ProviderUnavailable(format!(
                            "{what} failed: {error}"
                        )));
                    }
                };

                if should_retry {
                    last_error = Some(error);
                    if attempt < attempts {
                        let delay = Duration::from_millis(
                            EXPONENTIAL_BACKOFF_BASE.pow(attempt - 1) * 1000,
                        );
                        std::thread::sleep(delay);
                    }
                }
            }
        }
    }

    error!("{} failed after {} attempts", what, attempts);
    Err(RagError::ProviderUnavailable(match last_error {
        Some(e) => format!("{what} failed after {attempts} attempts: {e}"),
        None => format!("{what} failed after {attempts} attempts"),
    }))
}
