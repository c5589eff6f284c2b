//! Raw-file presence validation with a human-readable status file.

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::fsutil::write_atomic;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub data_dir: PathBuf,
    pub status_file: PathBuf,
    pub required_files: Vec<String>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("artifacts/data_ingestion/rossmann-store-sales"),
            status_file: PathBuf::from("artifacts/data_validation/status.txt"),
            required_files: vec!["train.csv".to_string(), "store.csv".to_string()],
        }
    }
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("data directory {path} is unreadable: {source}")]
    DataDirUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub status: bool,
    pub missing_files: Vec<String>,
}

/// Checks that every required raw file is present in the data directory and
/// writes the status file either way. The boolean status is the only output
/// the rest of the pipeline consumes.
pub fn validate_required_files(cfg: &ValidationConfig) -> Result<ValidationReport, ValidationError> {
    let listing = fs::read_dir(&cfg.data_dir).map_err(|source| {
        ValidationError::DataDirUnreadable {
            path: cfg.data_dir.clone(),
            source,
        }
    })?;

    let mut present: Vec<String> = Vec::new();
    for entry in listing {
        let entry = entry?;
        present.push(entry.file_name().to_string_lossy().to_string());
    }

    let missing_files: Vec<String> = cfg
        .required_files
        .iter()
        .filter(|name| !present.iter().any(|file| file == *name))
        .cloned()
        .collect();
    let status = missing_files.is_empty();

    let body = if status {
        "Validation status: true\nAll required raw files are present.\n".to_string()
    } else {
        format!(
            "Validation status: false\nMissing files: {}\n",
            missing_files.join(", ")
        )
    };
    write_atomic(&cfg.status_file, body.as_bytes())?;

    info!(
        component = "validation",
        event = "validation.finish",
        data_dir = %cfg.data_dir.display(),
        status = status,
        missing = ?missing_files
    );

    Ok(ValidationReport {
        status,
        missing_files,
    })
}
