use anyhow::{Context, Result};
use dotenv::dotenv;
use kakomon_store::config::PipelineConfig;
use kakomon_store::table::EmbeddingTable;
use serde::Serialize;
use std::fs;
use tracing::{error, info, warn};
use utils::tracing::setup_tracing;

mod graph;
mod similarity;

/// Entry in `models.json`, pointing the front-end at each generated graph.
#[derive(Debug, Serialize)]
struct ManifestEntry {
    id: String,
    name: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    setup_tracing();

    info!("Similarity graph builder starting up");

    let config = PipelineConfig::load();
    if config.models.is_empty() {
        anyhow::bail!("no embedding models configured");
    }

    let table_path = config.output_table_path();
    let table = EmbeddingTable::load(&table_path).with_context(|| {
        format!(
            "failed to load embedding table from {}",
            table_path.display()
        )
    })?;
    info!(
        rows = table.len(),
        table = %table_path.display(),
        "Loaded embedding table"
    );

    fs::create_dir_all(&config.output_dir).with_context(|| {
        format!(
            "failed to create output directory {}",
            config.output_dir.display()
        )
    })?;

    let mut manifest = Vec::new();
    let mut failures = 0usize;

    for model in &config.models {
        let column = model.vector_column();
        let Some(cells) = table.column_cells(&column) else {
            warn!(
                model = %model.name,
                column = %column,
                "Vector column missing from table, skipping model"
            );
            failures += 1;
            continue;
        };

        info!(
            model = %model.name,
            policy = ?config.selection_policy,
            "Computing similarity graph"
        );

        let graph = match similarity::compute_graph(
            table.records(),
            cells,
            &model.name,
            config.selection_policy,
        ) {
            Ok(graph) => graph,
            Err(e) => {
                error!(model = %model.name, error = %e, "Similarity computation failed");
                failures += 1;
                continue;
            }
        };

        let filename = format!("similar_results_{}.json", model.file_slug());
        let path = config.output_dir.join(&filename);
        let payload = serde_json::to_string_pretty(&graph)
            .context("failed to serialize similarity graph")?;
        fs::write(&path, payload)
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!(
            model = %model.name,
            output = %path.display(),
            categories = graph.categories.len(),
            "Similarity graph written"
        );

        manifest.push(ManifestEntry {
            id: filename,
            name: model.name.clone(),
        });
    }

    let manifest_path = config.output_dir.join("models.json");
    let payload =
        serde_json::to_string_pretty(&manifest).context("failed to serialize model manifest")?;
    fs::write(&manifest_path, payload)
        .with_context(|| format!("failed to write {}", manifest_path.display()))?;
    info!(
        manifest = %manifest_path.display(),
        models = manifest.len(),
        "Model manifest written"
    );

    if failures > 0 {
        anyhow::bail!("{failures} model(s) failed similarity generation");
    }

    info!("All similarity graphs generated");
    Ok(())
}
