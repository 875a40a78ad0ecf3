use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use kakomon_store::config::ModelConfig;
use tracing::info;

use super::{BackendError, Encoder};

/// Local bulk-batch encoder. The whole batch goes through the model in one
/// call.
pub struct BulkEncoder {
    name: String,
    model: TextEmbedding,
}

impl BulkEncoder {
    pub fn new(config: &ModelConfig) -> Result<Self, BackendError> {
        let identity = config.identity();
        let model_kind = supported_model(identity)
            .ok_or_else(|| BackendError::UnsupportedModel(identity.to_string()))?;

        info!(model = %config.name, id = %identity, "Initializing bulk embedding model");

        let model = TextEmbedding::try_new(
            InitOptions::new(model_kind).with_show_download_progress(true),
        )
        .map_err(|e| BackendError::Init(anyhow::anyhow!(e)))?;

        Ok(Self {
            name: config.name.clone(),
            model,
        })
    }
}

fn supported_model(identity: &str) -> Option<EmbeddingModel> {
    match identity {
        "intfloat/multilingual-e5-large" | "multilingual-e5-large" => {
            Some(EmbeddingModel::MultilingualE5Large)
        }
        "sentence-transformers/paraphrase-multilingual-MiniLM-L12-v2"
        | "paraphrase-multilingual-MiniLM-L12-v2" => Some(EmbeddingModel::ParaphraseMLMiniLML12V2),
        "BAAI/bge-small-en-v1.5" | "bge-small-en-v1.5" => Some(EmbeddingModel::BGESmallENV15),
        "BAAI/bge-large-en-v1.5" | "bge-large-en-v1.5" => Some(EmbeddingModel::BGELargeENV15),
        _ => None,
    }
}

#[async_trait]
impl Encoder for BulkEncoder {
    fn name(&self) -> &str {
        &self.name
    }

    async fn warm_up(&self) -> Result<(), BackendError> {
        Ok(())
    }

    async fn encode_batch(
        &self,
        texts: &[String],
        out: &mut Vec<Vec<f32>>,
    ) -> Result<(), BackendError> {
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let embeddings = self
            .model
            .embed(refs, None)
            .map_err(|e| BackendError::Encode(anyhow::anyhow!(e)))?;
        out.extend(embeddings);
        Ok(())
    }
}
