use anyhow::{Context, Result};
use dotenv::dotenv;
use kakomon_store::config::PipelineConfig;
use kakomon_store::record;
use std::fs;
use tracing::{error, info};
use utils::tracing::setup_tracing;

mod backends;
mod builder;

use builder::{BuildOptions, BuildStatus};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    setup_tracing();

    info!("Vectorizer starting up");

    let config = PipelineConfig::load();
    if config.models.is_empty() {
        anyhow::bail!("no embedding models configured");
    }

    let records = record::load_records(&config.input_file).with_context(|| {
        format!(
            "failed to load input records from {}",
            config.input_file.display()
        )
    })?;
    info!(
        rows = records.len(),
        input = %config.input_file.display(),
        "Loaded input records"
    );

    fs::create_dir_all(&config.output_dir).with_context(|| {
        format!(
            "failed to create output directory {}",
            config.output_dir.display()
        )
    })?;

    let options = BuildOptions {
        output_path: config.output_table_path(),
        batch_size: config.batch_size,
        force: env_flag("VECTORIZER_FORCE"),
        only_model: std::env::var("VECTORIZER_MODEL")
            .ok()
            .filter(|m| !m.is_empty()),
    };

    info!(
        output = %options.output_path.display(),
        batch_size = options.batch_size,
        force = options.force,
        "Starting embedding store build"
    );

    let summary = builder::build(&records, &config.models, &options).await?;

    for outcome in &summary.outcomes {
        match &outcome.status {
            BuildStatus::Completed => info!(
                model = %outcome.model,
                rows = outcome.rows_processed,
                duration_secs = outcome.duration.as_secs_f64(),
                "Model completed"
            ),
            BuildStatus::AlreadyComplete => info!(
                model = %outcome.model,
                "Model already complete, skipped"
            ),
            BuildStatus::Failed(reason) => error!(
                model = %outcome.model,
                reason = %reason,
                rows = outcome.rows_processed,
                duration_secs = outcome.duration.as_secs_f64(),
                "Model failed, progress flushed for resume"
            ),
        }
    }

    if !summary.all_succeeded() {
        anyhow::bail!("one or more models failed to vectorize");
    }

    info!("All model processing finished");
    Ok(())
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}
