use std::fs;
use std::path::Path;

use tracing::info;

use crate::error::StoreError;
use crate::record::{Record, REQUIRED_COLUMNS};
use crate::vector;

/// The durable per-model vector store: the record columns plus one vector
/// column per model, row-aligned and append-only. The persisted CSV is both
/// the builder's output and its resume-state input.
#[derive(Debug, Clone)]
pub struct EmbeddingTable {
    records: Vec<Record>,
    columns: Vec<VectorColumn>,
}

#[derive(Debug, Clone)]
struct VectorColumn {
    name: String,
    cells: Vec<String>,
}

impl EmbeddingTable {
    /// Fresh table over the input records, no vector columns yet.
    pub fn seed(records: Vec<Record>) -> Self {
        Self {
            records,
            columns: Vec::new(),
        }
    }

    /// Load a persisted table. Every required record column must be
    /// present; any other column is a vector column, kept in file order.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let csv_err = |source| StoreError::Csv {
            path: path.to_path_buf(),
            source,
        };

        let mut reader = csv::Reader::from_path(path).map_err(csv_err)?;
        let headers = reader.headers().map_err(csv_err)?.clone();

        let mut record_indices = [0usize; REQUIRED_COLUMNS.len()];
        for (slot, column) in REQUIRED_COLUMNS.into_iter().enumerate() {
            match headers.iter().position(|h| h == column) {
                Some(idx) => record_indices[slot] = idx,
                None => return Err(StoreError::MissingColumn(column)),
            }
        }

        let vector_headers: Vec<(usize, String)> = headers
            .iter()
            .enumerate()
            .filter(|(_, h)| !REQUIRED_COLUMNS.contains(h))
            .map(|(idx, h)| (idx, h.to_string()))
            .collect();

        let mut records = Vec::new();
        let mut columns: Vec<VectorColumn> = vector_headers
            .iter()
            .map(|(_, name)| VectorColumn {
                name: name.clone(),
                cells: Vec::new(),
            })
            .collect();

        for row in reader.records() {
            let row = row.map_err(csv_err)?;
            let field = |idx: usize| row.get(idx).unwrap_or("").to_string();

            records.push(Record {
                major_category: field(record_indices[0]),
                minor_category: field(record_indices[1]),
                problem_number: field(record_indices[2]),
                title: field(record_indices[3]),
                link: field(record_indices[4]),
                source: field(record_indices[5]),
            });
            for (column, (idx, _)) in columns.iter_mut().zip(&vector_headers) {
                column.cells.push(field(*idx));
            }
        }

        Ok(Self { records, columns })
    }

    /// Resume from an existing table, or seed a new one from the input
    /// records. An existing table that no longer lines up with the records
    /// row-for-row is fatal.
    pub fn load_or_seed(path: &Path, records: &[Record]) -> Result<Self, StoreError> {
        if path.exists() {
            let table = Self::load(path)?;
            if table.len() != records.len() {
                return Err(StoreError::RowCountMismatch {
                    table_rows: table.len(),
                    record_rows: records.len(),
                });
            }
            info!(path = %path.display(), rows = table.len(), "Resuming from existing embedding table");
            Ok(table)
        } else {
            info!(path = %path.display(), rows = records.len(), "Seeding new embedding table");
            Ok(Self::seed(records.to_vec()))
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    /// Cells of a vector column, row-aligned with `records()`.
    pub fn column_cells(&self, name: &str) -> Option<&[String]> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.cells.as_slice())
    }

    /// Index of the named column, appending an all-unprocessed column if it
    /// does not exist yet. Column order is append-only.
    pub fn ensure_column(&mut self, name: &str) -> usize {
        if let Some(idx) = self.column_index(name) {
            return idx;
        }
        info!(column = %name, "Adding vector column");
        self.columns.push(VectorColumn {
            name: name.to_string(),
            cells: vec![String::new(); self.records.len()],
        });
        self.columns.len() - 1
    }

    /// Remove a column entirely (forced recompute). Returns whether it
    /// existed.
    pub fn drop_column(&mut self, name: &str) -> bool {
        match self.column_index(name) {
            Some(idx) => {
                self.columns.remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn cell(&self, column: usize, row: usize) -> &str {
        &self.columns[column].cells[row]
    }

    /// A cell is only ever written once computed; rows are never left
    /// half-written.
    pub fn set_cell(&mut self, column: usize, row: usize, value: String) {
        self.columns[column].cells[row] = value;
    }

    /// Row indices still needing a vector for the column, in original row
    /// order.
    pub fn unprocessed_rows(&self, column: usize) -> Vec<usize> {
        self.columns[column]
            .cells
            .iter()
            .enumerate()
            .filter(|(_, cell)| vector::is_unprocessed(cell))
            .map(|(row, _)| row)
            .collect()
    }

    /// Persist the table. The write goes to a sibling temp file first and
    /// is renamed into place, so a checkpoint is never observed
    /// half-written.
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        };
        let csv_err = |source| StoreError::Csv {
            path: path.to_path_buf(),
            source,
        };

        let tmp_path = path.with_extension("csv.tmp");
        {
            let mut writer = csv::Writer::from_path(&tmp_path).map_err(csv_err)?;

            let mut header: Vec<&str> = REQUIRED_COLUMNS.to_vec();
            header.extend(self.columns.iter().map(|c| c.name.as_str()));
            writer.write_record(&header).map_err(csv_err)?;

            for (row, record) in self.records.iter().enumerate() {
                let mut fields: Vec<&str> = vec![
                    &record.major_category,
                    &record.minor_category,
                    &record.problem_number,
                    &record.title,
                    &record.link,
                    &record.source,
                ];
                fields.extend(self.columns.iter().map(|c| c.cells[row].as_str()));
                writer.write_record(&fields).map_err(csv_err)?;
            }
            writer.flush().map_err(io_err)?;
        }
        fs::rename(&tmp_path, path).map_err(io_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::EMPTY_VECTOR_MARKER;

    fn sample_records() -> Vec<Record> {
        vec![
            Record {
                major_category: "Technology".into(),
                minor_category: "Security".into(),
                problem_number: "Q1".into(),
                title: "What is a hash?".into(),
                link: "https://example.com/q1".into(),
                source: "R6 Spring".into(),
            },
            Record {
                major_category: "Technology".into(),
                minor_category: "Security".into(),
                problem_number: "Q2".into(),
                title: "What is a salt?".into(),
                link: "https://example.com/q2".into(),
                source: "R6 Spring".into(),
            },
            Record {
                major_category: "Management".into(),
                minor_category: "Audit".into(),
                problem_number: "Q3".into(),
                title: "".into(),
                link: "https://example.com/q3".into(),
                source: "R6 Autumn".into(),
            },
        ]
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("questions_vectors.csv");

        let mut table = EmbeddingTable::seed(sample_records());
        let col = table.ensure_column("vector_model_a");
        table.set_cell(col, 0, "[0.1,0.2]".into());
        table.set_cell(col, 2, EMPTY_VECTOR_MARKER.into());
        table.save(&path).unwrap();

        let loaded = EmbeddingTable::load(&path).unwrap();
        assert_eq!(loaded.records(), table.records());
        assert_eq!(
            loaded.column_cells("vector_model_a").unwrap(),
            &["[0.1,0.2]".to_string(), String::new(), EMPTY_VECTOR_MARKER.to_string()]
        );
        assert!(!path.with_extension("csv.tmp").exists());
    }

    #[test]
    fn test_unprocessed_rows() {
        let mut table = EmbeddingTable::seed(sample_records());
        let col = table.ensure_column("vector_m");
        assert_eq!(table.unprocessed_rows(col), vec![0, 1, 2]);

        table.set_cell(col, 0, "[0.5]".into());
        table.set_cell(col, 1, "None".into());
        table.set_cell(col, 2, EMPTY_VECTOR_MARKER.into());
        // the legacy null marker still counts as unprocessed, the
        // empty-vector marker does not
        assert_eq!(table.unprocessed_rows(col), vec![1]);
    }

    #[test]
    fn test_column_order_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.csv");

        let mut table = EmbeddingTable::seed(sample_records());
        table.ensure_column("vector_b");
        table.ensure_column("vector_a");
        table.save(&path).unwrap();

        let loaded = EmbeddingTable::load(&path).unwrap();
        let names: Vec<&str> = loaded.column_names().collect();
        assert_eq!(names, vec!["vector_b", "vector_a"]);
    }

    #[test]
    fn test_drop_column_leaves_others() {
        let mut table = EmbeddingTable::seed(sample_records());
        let a = table.ensure_column("vector_a");
        table.set_cell(a, 0, "[1]".into());
        table.ensure_column("vector_b");

        assert!(table.drop_column("vector_a"));
        assert!(!table.drop_column("vector_a"));
        assert!(!table.has_column("vector_a"));
        assert!(table.has_column("vector_b"));
    }

    #[test]
    fn test_load_or_seed_row_count_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.csv");

        let records = sample_records();
        EmbeddingTable::seed(records.clone()).save(&path).unwrap();

        let err = EmbeddingTable::load_or_seed(&path, &records[..2]).unwrap_err();
        assert!(matches!(
            err,
            StoreError::RowCountMismatch {
                table_rows: 3,
                record_rows: 2
            }
        ));
    }

    #[test]
    fn test_load_missing_record_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.csv");
        std::fs::write(&path, "major_category,minor_category,title\nA,B,t\n").unwrap();

        let err = EmbeddingTable::load(&path).unwrap_err();
        assert!(matches!(err, StoreError::MissingColumn("problem_number")));
    }
}
