use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use kakomon_store::config::ModelConfig;
use kakomon_store::record::Record;
use kakomon_store::table::EmbeddingTable;
use kakomon_store::vector::{self, EMPTY_VECTOR_MARKER};
use tracing::{debug, error, info};

use crate::backends::{self, BackendError, Encoder};

/// Checkpoint the table to disk every this many batches.
const SAVE_INTERVAL_BATCHES: usize = 10;

#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// The embedding table, read for resume state and written in place.
    pub output_path: PathBuf,
    pub batch_size: usize,
    /// Drop each targeted model's column and recompute it from scratch.
    pub force: bool,
    /// Restrict the run to one configured model by display name.
    pub only_model: Option<String>,
}

#[derive(Debug)]
pub struct BuildSummary {
    pub outcomes: Vec<ModelOutcome>,
}

impl BuildSummary {
    pub fn all_succeeded(&self) -> bool {
        self.outcomes
            .iter()
            .all(|o| !matches!(o.status, BuildStatus::Failed(_)))
    }
}

#[derive(Debug)]
pub struct ModelOutcome {
    pub model: String,
    pub status: BuildStatus,
    pub duration: Duration,
    /// Cells populated during this run, blank-text markers included.
    pub rows_processed: usize,
}

#[derive(Debug)]
pub enum BuildStatus {
    Completed,
    /// Every row already had a cell; no backend was touched.
    AlreadyComplete,
    Failed(String),
}

type EncoderFactory<'a> =
    &'a (dyn Fn(&ModelConfig) -> Result<Box<dyn Encoder>, BackendError> + Sync);

/// Populate the embedding table for every targeted model, resuming from
/// whatever the table already holds. Backend failures are reported per
/// model; configuration and I/O failures abort the whole run.
pub async fn build(
    records: &[Record],
    models: &[ModelConfig],
    options: &BuildOptions,
) -> Result<BuildSummary> {
    build_with(records, models, options, &backends::for_model).await
}

async fn build_with(
    records: &[Record],
    models: &[ModelConfig],
    options: &BuildOptions,
    factory: EncoderFactory<'_>,
) -> Result<BuildSummary> {
    if options.batch_size == 0 {
        bail!("batch size must be positive");
    }

    let targeted: Vec<&ModelConfig> = match &options.only_model {
        Some(name) => {
            let selected: Vec<&ModelConfig> =
                models.iter().filter(|m| &m.name == name).collect();
            if selected.is_empty() {
                bail!("model '{name}' is not present in the configuration");
            }
            selected
        }
        None => models.iter().collect(),
    };

    let mut table = EmbeddingTable::load_or_seed(&options.output_path, records)
        .context("failed to open embedding table")?;

    let mut outcomes = Vec::with_capacity(targeted.len());
    for model in targeted {
        info!(model = %model.name, "Starting model build");
        let started = Instant::now();
        let (status, rows_processed) =
            build_model(&mut table, records, model, options, factory).await?;
        outcomes.push(ModelOutcome {
            model: model.name.clone(),
            status,
            duration: started.elapsed(),
            rows_processed,
        });
    }

    Ok(BuildSummary { outcomes })
}

/// Build one model's column. `Err` is reserved for failures that
/// compromise the whole run (I/O); backend trouble comes back as
/// `BuildStatus::Failed`.
async fn build_model(
    table: &mut EmbeddingTable,
    records: &[Record],
    model: &ModelConfig,
    options: &BuildOptions,
    factory: EncoderFactory<'_>,
) -> Result<(BuildStatus, usize)> {
    let column = model.vector_column();

    if options.force && table.drop_column(&column) {
        info!(model = %model.name, column = %column, "Dropped vector column for forced recompute");
    }

    let col = table.ensure_column(&column);
    let pending = table.unprocessed_rows(col);
    if pending.is_empty() {
        info!(model = %model.name, column = %column, "Vector column already complete, nothing to do");
        return Ok((BuildStatus::AlreadyComplete, 0));
    }

    info!(
        model = %model.name,
        pending = pending.len(),
        total = table.len(),
        "Vectorizing unprocessed rows"
    );

    // Blank titles never reach a backend; they get the empty-vector marker
    // up front, whichever backend kind is configured.
    let mut processed = 0usize;
    let mut to_encode = Vec::with_capacity(pending.len());
    for row in pending {
        if records[row].title.trim().is_empty() {
            table.set_cell(col, row, EMPTY_VECTOR_MARKER.to_string());
            processed += 1;
        } else {
            to_encode.push(row);
        }
    }

    if to_encode.is_empty() {
        table.save(&options.output_path)?;
        info!(model = %model.name, rows = processed, "Only blank rows were pending");
        return Ok((BuildStatus::Completed, processed));
    }

    let encoder = match factory(model) {
        Ok(encoder) => encoder,
        Err(e) => {
            error!(model = %model.name, error = %e, "Failed to initialize embedding backend");
            table.save(&options.output_path)?;
            return Ok((BuildStatus::Failed(e.to_string()), processed));
        }
    };

    if let Err(e) = encoder.warm_up().await {
        error!(model = %model.name, error = %e, "Backend warm-up failed");
        table.save(&options.output_path)?;
        return Ok((BuildStatus::Failed(e.to_string()), processed));
    }
    debug!(backend = encoder.name(), "Backend ready");

    let total_batches = to_encode.len().div_ceil(options.batch_size);
    for (batch_num, batch) in to_encode.chunks(options.batch_size).enumerate() {
        let texts: Vec<String> = batch.iter().map(|&row| records[row].title.clone()).collect();
        let mut vectors = Vec::with_capacity(batch.len());
        let result = encoder.encode_batch(&texts, &mut vectors).await;

        // Cells are assigned only for fully computed vectors; on failure
        // the completed prefix of the batch still lands in the table.
        for (&row, vector) in batch.iter().zip(vectors.iter()) {
            table.set_cell(col, row, vector::encode(vector));
            processed += 1;
        }

        if let Err(e) = result {
            error!(
                model = %model.name,
                batch = batch_num + 1,
                batches = total_batches,
                error = %e,
                "Embedding batch failed, flushing progress and aborting this model"
            );
            table
                .save(&options.output_path)
                .context("failed to flush progress after backend error")?;
            return Ok((BuildStatus::Failed(e.to_string()), processed));
        }

        debug!(
            model = %model.name,
            batch = batch_num + 1,
            batches = total_batches,
            "Batch complete"
        );

        if (batch_num + 1) % SAVE_INTERVAL_BATCHES == 0 {
            table.save(&options.output_path)?;
            info!(
                model = %model.name,
                batch = batch_num + 1,
                batches = total_batches,
                "Checkpoint saved"
            );
        }
    }

    table.save(&options.output_path)?;
    info!(model = %model.name, rows = processed, "Vectorization complete");
    Ok((BuildStatus::Completed, processed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use kakomon_store::config::BackendKind;
    use std::fs;
    use std::path::Path;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedEncoder {
        calls: Arc<AtomicUsize>,
        fail_at: Option<usize>,
        fail_warm_up: bool,
        salt: u32,
    }

    #[async_trait]
    impl Encoder for ScriptedEncoder {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn warm_up(&self) -> Result<(), BackendError> {
            if self.fail_warm_up {
                return Err(BackendError::EmptyEmbedding);
            }
            Ok(())
        }

        async fn encode_batch(
            &self,
            texts: &[String],
            out: &mut Vec<Vec<f32>>,
        ) -> Result<(), BackendError> {
            for text in texts {
                let call = self.calls.fetch_add(1, Ordering::SeqCst);
                if let Some(fail_at) = self.fail_at
                    && call >= fail_at
                {
                    return Err(BackendError::EmptyEmbedding);
                }
                out.push(test_vector(text, self.salt));
            }
            Ok(())
        }
    }

    fn test_vector(text: &str, salt: u32) -> Vec<f32> {
        let seed = text
            .bytes()
            .fold(salt, |acc, b| acc.wrapping_mul(31).wrapping_add(u32::from(b)));
        (0..4)
            .map(|i| (seed.wrapping_add(i) % 97) as f32 / 97.0)
            .collect()
    }

    struct Script {
        calls: Arc<AtomicUsize>,
        fail_at: Option<usize>,
        fail_warm_up: bool,
        salt: u32,
    }

    impl Script {
        fn new() -> Self {
            Self {
                calls: Arc::new(AtomicUsize::new(0)),
                fail_at: None,
                fail_warm_up: false,
                salt: 7,
            }
        }

        fn fail_at(mut self, call: usize) -> Self {
            self.fail_at = Some(call);
            self
        }

        fn fail_warm_up(mut self) -> Self {
            self.fail_warm_up = true;
            self
        }

        fn salt(mut self, salt: u32) -> Self {
            self.salt = salt;
            self
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn factory(
            &self,
        ) -> impl Fn(&ModelConfig) -> Result<Box<dyn Encoder>, BackendError> + Sync {
            move |_| {
                Ok(Box::new(ScriptedEncoder {
                    calls: self.calls.clone(),
                    fail_at: self.fail_at,
                    fail_warm_up: self.fail_warm_up,
                    salt: self.salt,
                }))
            }
        }
    }

    fn sample_records(n: usize) -> Vec<Record> {
        (0..n)
            .map(|i| Record {
                major_category: "Technology".into(),
                minor_category: "Security".into(),
                problem_number: format!("Q{i}"),
                title: format!("question number {i}"),
                link: format!("https://example.com/q{i}"),
                source: "R6 Spring".into(),
            })
            .collect()
    }

    fn remote_model(name: &str) -> ModelConfig {
        ModelConfig {
            name: name.to_string(),
            kind: BackendKind::Remote,
            model_id: None,
            timeout_secs: None,
            dimension: None,
        }
    }

    fn options(dir: &Path, batch_size: usize) -> BuildOptions {
        BuildOptions {
            output_path: dir.join("questions_vectors.csv"),
            batch_size,
            force: false,
            only_model: None,
        }
    }

    fn column_cells(path: &Path, column: &str) -> Vec<String> {
        let table = EmbeddingTable::load(path).unwrap();
        table.column_cells(column).unwrap().to_vec()
    }

    #[tokio::test]
    async fn test_build_completes_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let records = sample_records(5);
        let models = vec![remote_model("gemma")];
        let opts = options(dir.path(), 2);

        let script = Script::new();
        let summary = build_with(&records, &models, &opts, &script.factory())
            .await
            .unwrap();

        assert!(summary.all_succeeded());
        assert!(matches!(summary.outcomes[0].status, BuildStatus::Completed));
        assert_eq!(summary.outcomes[0].rows_processed, 5);
        assert_eq!(script.calls(), 5);

        let cells = column_cells(&opts.output_path, "vector_gemma");
        assert!(cells.iter().all(|c| vector::parse_cell(c).is_some()));
    }

    #[tokio::test]
    async fn test_second_run_is_a_byte_identical_noop() {
        let dir = tempfile::tempdir().unwrap();
        let records = sample_records(4);
        let models = vec![remote_model("gemma")];
        let opts = options(dir.path(), 2);

        let first = Script::new();
        build_with(&records, &models, &opts, &first.factory())
            .await
            .unwrap();
        let first_bytes = fs::read(&opts.output_path).unwrap();

        let second = Script::new();
        let summary = build_with(&records, &models, &opts, &second.factory())
            .await
            .unwrap();

        assert!(matches!(
            summary.outcomes[0].status,
            BuildStatus::AlreadyComplete
        ));
        assert_eq!(second.calls(), 0);
        assert_eq!(fs::read(&opts.output_path).unwrap(), first_bytes);
    }

    #[tokio::test]
    async fn test_blank_titles_never_reach_the_backend() {
        let dir = tempfile::tempdir().unwrap();
        let mut records = sample_records(3);
        records[0].title = String::new();
        records[2].title = "   ".into();
        let models = vec![remote_model("gemma")];
        let opts = options(dir.path(), 8);

        let script = Script::new();
        let summary = build_with(&records, &models, &opts, &script.factory())
            .await
            .unwrap();

        assert!(summary.all_succeeded());
        assert_eq!(script.calls(), 1);

        let cells = column_cells(&opts.output_path, "vector_gemma");
        assert_eq!(cells[0], EMPTY_VECTOR_MARKER);
        assert_eq!(cells[2], EMPTY_VECTOR_MARKER);
        assert!(vector::parse_cell(&cells[1]).is_some());
    }

    #[tokio::test]
    async fn test_resume_after_backend_failure() {
        let dir = tempfile::tempdir().unwrap();
        let records = sample_records(6);
        let models = vec![remote_model("gemma")];
        let opts = options(dir.path(), 2);

        // First run dies on its fourth item (mid-batch): rows 0..=2 land.
        let failing = Script::new().fail_at(3);
        let summary = build_with(&records, &models, &opts, &failing.factory())
            .await
            .unwrap();
        assert!(matches!(
            summary.outcomes[0].status,
            BuildStatus::Failed(_)
        ));
        assert_eq!(summary.outcomes[0].rows_processed, 3);

        let cells = column_cells(&opts.output_path, "vector_gemma");
        assert!(cells[..3].iter().all(|c| vector::parse_cell(c).is_some()));
        assert!(cells[3..].iter().all(|c| vector::is_unprocessed(c)));

        // The rerun only encodes the remaining rows.
        let resume = Script::new();
        let summary = build_with(&records, &models, &opts, &resume.factory())
            .await
            .unwrap();
        assert!(summary.all_succeeded());
        assert_eq!(resume.calls(), 3);

        // And the result matches an uninterrupted run.
        let clean_dir = tempfile::tempdir().unwrap();
        let clean_opts = options(clean_dir.path(), 2);
        build_with(&records, &models, &clean_opts, &Script::new().factory())
            .await
            .unwrap();
        assert_eq!(
            fs::read(&opts.output_path).unwrap(),
            fs::read(&clean_opts.output_path).unwrap()
        );
    }

    #[tokio::test]
    async fn test_warm_up_failure_fails_the_model_before_any_batch() {
        let dir = tempfile::tempdir().unwrap();
        let records = sample_records(3);
        let models = vec![remote_model("gemma")];
        let opts = options(dir.path(), 2);

        let script = Script::new().fail_warm_up();
        let summary = build_with(&records, &models, &opts, &script.factory())
            .await
            .unwrap();

        assert!(matches!(
            summary.outcomes[0].status,
            BuildStatus::Failed(_)
        ));
        assert_eq!(script.calls(), 0);

        let cells = column_cells(&opts.output_path, "vector_gemma");
        assert!(cells.iter().all(|c| vector::is_unprocessed(c)));
    }

    #[tokio::test]
    async fn test_force_recomputes_only_the_targeted_model() {
        let dir = tempfile::tempdir().unwrap();
        let records = sample_records(4);
        let models = vec![remote_model("gemma"), remote_model("ruri")];
        let opts = options(dir.path(), 2);

        build_with(&records, &models, &opts, &Script::new().factory())
            .await
            .unwrap();
        let ruri_before = column_cells(&opts.output_path, "vector_ruri");
        let gemma_before = column_cells(&opts.output_path, "vector_gemma");

        let forced = Script::new().salt(99);
        let forced_opts = BuildOptions {
            force: true,
            only_model: Some("gemma".to_string()),
            ..opts.clone()
        };
        let summary = build_with(&records, &models, &forced_opts, &forced.factory())
            .await
            .unwrap();

        assert!(summary.all_succeeded());
        assert_eq!(summary.outcomes.len(), 1);
        assert_eq!(forced.calls(), 4);

        assert_eq!(column_cells(&opts.output_path, "vector_ruri"), ruri_before);
        assert_ne!(column_cells(&opts.output_path, "vector_gemma"), gemma_before);
    }

    #[tokio::test]
    async fn test_unknown_only_model_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let records = sample_records(2);
        let models = vec![remote_model("gemma")];
        let opts = BuildOptions {
            only_model: Some("missing".to_string()),
            ..options(dir.path(), 2)
        };

        let script = Script::new();
        let err = build_with(&records, &models, &opts, &script.factory())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("missing"));
        assert!(!opts.output_path.exists());
    }

    #[tokio::test]
    async fn test_failed_model_does_not_block_the_next() {
        let dir = tempfile::tempdir().unwrap();
        let records = sample_records(3);
        let models = vec![remote_model("bad"), remote_model("good")];
        let opts = options(dir.path(), 2);

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in_factory = calls.clone();
        let factory = move |model: &ModelConfig| {
            if model.name == "bad" {
                Err(BackendError::UnsupportedModel(model.name.clone()))
            } else {
                Ok(Box::new(ScriptedEncoder {
                    calls: calls_in_factory.clone(),
                    fail_at: None,
                    fail_warm_up: false,
                    salt: 7,
                }) as Box<dyn Encoder>)
            }
        };

        let summary = build_with(&records, &models, &opts, &factory).await.unwrap();

        assert!(matches!(summary.outcomes[0].status, BuildStatus::Failed(_)));
        assert!(matches!(summary.outcomes[1].status, BuildStatus::Completed));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(!EmbeddingTable::load(&opts.output_path)
            .unwrap()
            .has_column("vector_bad")
            || column_cells(&opts.output_path, "vector_bad")
                .iter()
                .all(|c| vector::is_unprocessed(c)));
    }

    #[tokio::test]
    async fn test_zero_batch_size_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let records = sample_records(2);
        let models = vec![remote_model("gemma")];
        let opts = options(dir.path(), 0);

        let script = Script::new();
        assert!(
            build_with(&records, &models, &opts, &script.factory())
                .await
                .is_err()
        );
    }
}
