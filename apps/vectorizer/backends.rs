use async_trait::async_trait;
use kakomon_store::config::{BackendKind, ModelConfig};
use thiserror::Error;

mod bulk;
mod remote;

pub use bulk::BulkEncoder;
pub use remote::RemoteEncoder;

/// Errors surfaced by an embedding backend. Any of these aborts the
/// current model's build; other models are unaffected and the build is
/// resumable.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("model '{0}' is not supported by the bulk encoder")]
    UnsupportedModel(String),

    #[error("failed to initialize embedding model: {0}")]
    Init(anyhow::Error),

    #[error("embedding request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("embedding endpoint returned status {0}")]
    Status(reqwest::StatusCode),

    #[error("embedding endpoint returned no embedding")]
    EmptyEmbedding,

    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    Dimension { expected: usize, got: usize },

    #[error("bulk encoding failed: {0}")]
    Encode(anyhow::Error),
}

/// Capability interface over the two backend families. The builder only
/// ever sees this trait, which keeps the resume and checkpoint logic
/// backend-agnostic.
#[async_trait]
pub trait Encoder: Send + Sync {
    fn name(&self) -> &str;

    /// One cheap call before the main loop, so connectivity or
    /// model-availability failures surface before any batch is attempted.
    /// No-op for local backends.
    async fn warm_up(&self) -> Result<(), BackendError>;

    /// Append one vector per input text to `out`, in input order. On
    /// failure the completed prefix stays in `out` so the caller can flush
    /// it before aborting.
    async fn encode_batch(
        &self,
        texts: &[String],
        out: &mut Vec<Vec<f32>>,
    ) -> Result<(), BackendError>;
}

/// The single dispatch point from configuration to backend.
pub fn for_model(model: &ModelConfig) -> Result<Box<dyn Encoder>, BackendError> {
    match model.kind {
        BackendKind::Bulk => Ok(Box::new(BulkEncoder::new(model)?)),
        BackendKind::Remote => Ok(Box::new(RemoteEncoder::new(model))),
    }
}
