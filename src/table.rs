//! Generic delimited-table access for the model collaborators.
//!
//! The trainer and evaluator consume the written train/test files as plain
//! tables: header row plus string cells. Typed interpretation (numeric vs
//! categorical) happens by probing content, the way a dynamically typed
//! reader would infer dtypes.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TableError {
    #[error("table at {path} is unavailable: {source}")]
    SourceUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("table at {path} is missing required column {column}")]
    MissingColumn { path: PathBuf, column: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub path: PathBuf,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn read(path: &Path) -> Result<Self, TableError> {
        let file = fs::File::open(path).map_err(|source| TableError::SourceUnavailable {
            path: path.to_path_buf(),
            source,
        })?;
        let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(file);

        let headers: Vec<String> = reader
            .headers()?
            .iter()
            .map(|column| column.trim().to_string())
            .collect();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            rows.push(record.iter().map(|cell| cell.trim().to_string()).collect());
        }

        Ok(Self {
            path: path.to_path_buf(),
            headers,
            rows,
        })
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|column| column == name)
    }

    pub fn require_column(&self, name: &str) -> Result<usize, TableError> {
        self.column_index(name)
            .ok_or_else(|| TableError::MissingColumn {
                path: self.path.clone(),
                column: name.to_string(),
            })
    }

    /// A column is numeric when every non-empty cell parses as a float.
    /// Empty cells are missing values and do not make a column categorical.
    pub fn is_numeric_column(&self, idx: usize) -> bool {
        self.rows.iter().all(|row| {
            let cell = row.get(idx).map(String::as_str).unwrap_or_default();
            cell.is_empty() || cell.parse::<f64>().is_ok()
        })
    }
}
