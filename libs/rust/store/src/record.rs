use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Columns every input table must carry, in their canonical order.
pub const REQUIRED_COLUMNS: [&str; 6] = [
    "major_category",
    "minor_category",
    "problem_number",
    "title",
    "link",
    "source",
];

/// One scraped exam question. Rows are immutable once ingested; the pair
/// `(source, problem_number)` is the identity downstream consumers key on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub major_category: String,
    pub minor_category: String,
    pub problem_number: String,
    pub title: String,
    pub link: String,
    pub source: String,
}

impl Record {
    pub fn key(&self) -> (&str, &str) {
        (&self.source, &self.problem_number)
    }
}

/// Load the scraped record table. A missing required column is fatal before
/// any further work.
pub fn load_records(path: &Path) -> Result<Vec<Record>, StoreError> {
    let mut reader = csv::Reader::from_path(path).map_err(|source| StoreError::Csv {
        path: path.to_path_buf(),
        source,
    })?;

    let headers = reader
        .headers()
        .map_err(|source| StoreError::Csv {
            path: path.to_path_buf(),
            source,
        })?
        .clone();
    for column in REQUIRED_COLUMNS {
        if !headers.iter().any(|h| h == column) {
            return Err(StoreError::MissingColumn(column));
        }
    }

    let mut records = Vec::new();
    for row in reader.deserialize() {
        let record: Record = row.map_err(|source| StoreError::Csv {
            path: path.to_path_buf(),
            source,
        })?;
        records.push(record);
    }
    Ok(records)
}
