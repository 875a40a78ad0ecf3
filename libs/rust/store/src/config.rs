use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};

use serde::Deserialize;
use tracing::{info, warn};

const DEFAULT_BATCH_SIZE: usize = 32;
const DEFAULT_REMOTE_TIMEOUT_SECS: u64 = 30;

/// Pipeline-wide configuration, loaded from a YAML file with environment
/// overrides applied on top.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Scraped record table (the pipeline's read-only input).
    pub input_file: PathBuf,
    /// Where the embedding table and similarity graphs land.
    pub output_dir: PathBuf,
    pub batch_size: usize,
    pub selection_policy: SelectionPolicy,
    pub models: Vec<ModelConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input_file: PathBuf::from("data/questions.csv"),
            output_dir: PathBuf::from("output"),
            batch_size: DEFAULT_BATCH_SIZE,
            selection_policy: SelectionPolicy::TopKOrThreshold,
            models: Vec::new(),
        }
    }
}

/// One embedding model entry.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    /// Display name; also the graph tag and the single-model filter key.
    pub name: String,
    pub kind: BackendKind,
    /// Underlying model identifier when it differs from the display name
    /// (e.g. a HuggingFace id).
    #[serde(default)]
    pub model_id: Option<String>,
    /// Per-request timeout for remote backends.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// When set, every returned embedding is validated against this
    /// dimensionality.
    #[serde(default)]
    pub dimension: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// Local model encoding a whole batch of texts in one call.
    Bulk,
    /// Remote endpoint encoding one text per request.
    Remote,
}

/// How many similarity edges each focal record keeps. The two variants are
/// the two pipeline generations; both stay supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionPolicy {
    /// Keep the top five candidates plus anything scoring at or above the
    /// threshold.
    TopKOrThreshold,
    /// Keep only candidates at or above the threshold, uncapped.
    ThresholdOnly,
}

impl ModelConfig {
    /// The identity the vector column and output files derive from.
    pub fn identity(&self) -> &str {
        self.model_id.as_deref().unwrap_or(&self.name)
    }

    /// Deterministic vector column name for this model. Path separators,
    /// dots, colons and hyphens are folded to underscores so the same model
    /// always maps to the same column.
    pub fn vector_column(&self) -> String {
        format!("vector_{}", sanitize_identifier(self.identity()))
    }

    /// Short lowercase slug used in per-model output filenames.
    pub fn file_slug(&self) -> String {
        let last = self.name.rsplit('/').next().unwrap_or(&self.name);
        last.replace(['-', '.'], "_").to_lowercase()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.unwrap_or(DEFAULT_REMOTE_TIMEOUT_SECS))
    }
}

fn sanitize_identifier(identity: &str) -> String {
    identity.replace(['/', '.', ':', '-'], "_")
}

impl PipelineConfig {
    /// Load from `PIPELINE_CONFIG_PATH` (default `pipeline.yaml`), falling
    /// back to defaults when the file is missing or unparseable, then apply
    /// environment overrides.
    pub fn load() -> Self {
        let path = env::var("PIPELINE_CONFIG_PATH").unwrap_or_else(|_| "pipeline.yaml".to_string());
        Self::load_from(Path::new(&path))
    }

    pub fn load_from(path: &Path) -> Self {
        let mut config = match fs::read_to_string(path) {
            Ok(contents) => match serde_yaml::from_str::<PipelineConfig>(&contents) {
                Ok(config) => config,
                Err(err) => {
                    warn!(error = %err, path = %path.display(), "Failed to parse pipeline config, using defaults");
                    PipelineConfig::default()
                }
            },
            Err(err) => {
                warn!(error = %err, path = %path.display(), "Pipeline config not found, using defaults");
                PipelineConfig::default()
            }
        };

        apply_env_overrides(&mut config);

        info!(
            input = %config.input_file.display(),
            output_dir = %config.output_dir.display(),
            batch_size = config.batch_size,
            models = config.models.len(),
            "Pipeline config loaded"
        );

        config
    }

    /// The embedding table path: the input file's stem with a `_vectors`
    /// suffix, under the output directory.
    pub fn output_table_path(&self) -> PathBuf {
        let stem = self
            .input_file
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("records");
        self.output_dir.join(format!("{stem}_vectors.csv"))
    }
}

fn apply_env_overrides(config: &mut PipelineConfig) {
    if let Ok(value) = env::var("PIPELINE_OUTPUT_DIR") {
        config.output_dir = PathBuf::from(value);
    }

    if let Ok(value) = env::var("PIPELINE_BATCH_SIZE") {
        match value.parse::<usize>() {
            Ok(size) if size > 0 => config.batch_size = size,
            _ => warn!(value = %value, "Ignoring invalid PIPELINE_BATCH_SIZE override"),
        }
    }

    if let Ok(value) = env::var("PIPELINE_SELECTION_POLICY") {
        match value.as_str() {
            "top-k-or-threshold" => config.selection_policy = SelectionPolicy::TopKOrThreshold,
            "threshold-only" => config.selection_policy = SelectionPolicy::ThresholdOnly,
            other => warn!(value = %other, "Ignoring unknown PIPELINE_SELECTION_POLICY override"),
        }
    }
}
