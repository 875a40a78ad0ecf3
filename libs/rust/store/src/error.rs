use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the record and embedding table stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed csv in {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    /// A required record column is absent from an input table. Reported
    /// before any computation starts.
    #[error("required column '{0}' is missing from the table")]
    MissingColumn(&'static str),

    /// The persisted embedding table no longer lines up with the record
    /// table it was seeded from.
    #[error("embedding table has {table_rows} rows but the record table has {record_rows}")]
    RowCountMismatch {
        table_rows: usize,
        record_rows: usize,
    },
}
