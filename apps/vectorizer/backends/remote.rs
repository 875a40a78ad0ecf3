use std::time::Duration;

use async_trait::async_trait;
use kakomon_store::config::ModelConfig;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{BackendError, Encoder};

const DEFAULT_HOST: &str = "http://localhost";
const DEFAULT_PORT: u16 = 11434;
const WARM_UP_PROMPT: &str = "warm-up";

/// Per-item encoder against an Ollama-compatible embeddings endpoint. Each
/// text is one request; the configured timeout applies per request.
pub struct RemoteEncoder {
    client: Client,
    base_url: String,
    name: String,
    model: String,
    timeout: Duration,
    dimension: Option<usize>,
}

#[derive(Debug, Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    embedding: Vec<f32>,
}

impl RemoteEncoder {
    /// Endpoint resolved from `OLLAMA_HOST` / `OLLAMA_PORT`.
    pub fn new(config: &ModelConfig) -> Self {
        let host = std::env::var("OLLAMA_HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string());
        // Ensure host has a protocol prefix
        let host = if !host.starts_with("http://") && !host.starts_with("https://") {
            format!("http://{host}")
        } else {
            host
        };
        let port = std::env::var("OLLAMA_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        Self::with_base_url(config, format!("{host}:{port}"))
    }

    pub fn with_base_url(config: &ModelConfig, base_url: String) -> Self {
        info!(
            base_url = %base_url,
            model = %config.identity(),
            timeout_secs = config.request_timeout().as_secs(),
            "Initializing remote embedding client"
        );

        Self {
            client: Client::new(),
            base_url,
            name: config.name.clone(),
            model: config.identity().to_string(),
            timeout: config.request_timeout(),
            dimension: config.dimension,
        }
    }

    async fn embed_single(&self, text: &str) -> Result<Vec<f32>, BackendError> {
        let url = format!("{}/api/embeddings", self.base_url);
        let response = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(&EmbeddingsRequest {
                model: &self.model,
                prompt: text,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::Status(status));
        }

        let body: EmbeddingsResponse = response.json().await?;
        if body.embedding.is_empty() {
            return Err(BackendError::EmptyEmbedding);
        }
        if let Some(expected) = self.dimension
            && body.embedding.len() != expected
        {
            return Err(BackendError::Dimension {
                expected,
                got: body.embedding.len(),
            });
        }
        Ok(body.embedding)
    }
}

#[async_trait]
impl Encoder for RemoteEncoder {
    fn name(&self) -> &str {
        &self.name
    }

    async fn warm_up(&self) -> Result<(), BackendError> {
        info!(model = %self.model, "Warming up remote embedding model");
        self.embed_single(WARM_UP_PROMPT).await.map(|_| ())
    }

    async fn encode_batch(
        &self,
        texts: &[String],
        out: &mut Vec<Vec<f32>>,
    ) -> Result<(), BackendError> {
        for text in texts {
            let vector = self.embed_single(text).await?;
            out.push(vector);
        }
        Ok(())
    }
}
