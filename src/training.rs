//! Model-training collaborator.
//!
//! Consumes the written train/test tables, splits them into features and
//! target (target = Sales, the date column never enters the features),
//! ordinal-encodes categorical columns from the training table's levels,
//! fits the booster with the test table as the early-stopping eval set and
//! persists the artifact.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::model::{BoosterModel, BoosterParams, FitReport, Matrix, ModelError, ModelSchema};
use crate::table::{Table, TableError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    pub train_file: PathBuf,
    pub test_file: PathBuf,
    pub model_file: PathBuf,
    pub target_column: String,
    /// Columns excluded from the features outright (the target is always
    /// excluded; the date column must never leak into the design matrix).
    pub drop_columns: Vec<String>,
    pub params: BoosterParams,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            train_file: PathBuf::from("artifacts/data_transformation/train.csv"),
            test_file: PathBuf::from("artifacts/data_transformation/test.csv"),
            model_file: PathBuf::from("artifacts/model_trainer/model.json"),
            target_column: "Sales".to_string(),
            drop_columns: vec!["Date".to_string()],
            params: BoosterParams::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error(transparent)]
    Table(#[from] TableError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("target column {column} has non-numeric value '{value}' at data row {row}")]
    InvalidTarget {
        column: String,
        value: String,
        row: usize,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingReport {
    pub fit: FitReport,
    pub feature_count: usize,
    pub categorical_features: Vec<String>,
    pub model_file: PathBuf,
}

/// Categorical columns are those with non-numeric content, plus anything
/// named after the store-type/assortment families regardless of content.
pub fn infer_model_schema(table: &Table, target: &str, drop: &[String]) -> ModelSchema {
    let mut feature_names = Vec::new();
    let mut categorical_levels = BTreeMap::new();

    for (idx, name) in table.headers.iter().enumerate() {
        if name == target || drop.iter().any(|column| column == name) {
            continue;
        }
        feature_names.push(name.clone());

        let named_categorical = name.contains("StoreType") || name.contains("Assortment");
        if named_categorical || !table.is_numeric_column(idx) {
            let mut levels: Vec<String> = table
                .rows
                .iter()
                .filter_map(|row| row.get(idx))
                .filter(|cell| !cell.is_empty())
                .cloned()
                .collect();
            levels.sort();
            levels.dedup();
            categorical_levels.insert(name.clone(), levels);
        }
    }

    ModelSchema {
        feature_names,
        categorical_levels,
    }
}

/// Builds the design matrix for `table` under `schema`. Categorical cells
/// become their ordinal level index; unseen levels and empty cells become
/// NaN, which the booster treats as missing.
pub fn build_design(
    table: &Table,
    schema: &ModelSchema,
    target: &str,
) -> Result<(Matrix, Vec<f64>), TrainingError> {
    let target_idx = table.require_column(target)?;

    let mut columns = Vec::with_capacity(schema.feature_names.len());
    for name in &schema.feature_names {
        let idx = table.require_column(name)?;
        columns.push((idx, schema.categorical_levels.get(name)));
    }

    let mut y = Vec::with_capacity(table.n_rows());
    let mut values = Vec::with_capacity(table.n_rows() * columns.len());

    for (row_idx, row) in table.rows.iter().enumerate() {
        let raw_target = row.get(target_idx).map(String::as_str).unwrap_or_default();
        let target_value =
            raw_target
                .parse::<f64>()
                .map_err(|_| TrainingError::InvalidTarget {
                    column: target.to_string(),
                    value: raw_target.to_string(),
                    row: row_idx,
                })?;
        y.push(target_value);

        for (idx, levels) in &columns {
            let cell = row.get(*idx).map(String::as_str).unwrap_or_default();
            let encoded = match levels {
                Some(levels) => {
                    if cell.is_empty() {
                        f64::NAN
                    } else {
                        match levels.binary_search_by(|level| level.as_str().cmp(cell)) {
                            Ok(position) => position as f64,
                            Err(_) => f64::NAN,
                        }
                    }
                }
                None => {
                    if cell.is_empty() {
                        f64::NAN
                    } else {
                        cell.parse::<f64>().unwrap_or(f64::NAN)
                    }
                }
            };
            values.push(encoded);
        }
    }

    let x = Matrix::from_row_major(values, columns.len())?;
    Ok((x, y))
}

/// Reads the train/test tables, fits the booster and saves the artifact.
pub fn train_model(cfg: &TrainerConfig) -> Result<TrainingReport, TrainingError> {
    let train = Table::read(&cfg.train_file)?;
    let test = Table::read(&cfg.test_file)?;
    train.require_column(&cfg.target_column)?;

    let schema = infer_model_schema(&train, &cfg.target_column, &cfg.drop_columns);
    let categorical_features: Vec<String> = schema.categorical_levels.keys().cloned().collect();
    info!(
        component = "training",
        event = "training.schema.inferred",
        features = schema.feature_names.len(),
        categorical = ?categorical_features
    );

    let (x_train, y_train) = build_design(&train, &schema, &cfg.target_column)?;
    let (x_test, y_test) = build_design(&test, &schema, &cfg.target_column)?;

    let feature_count = schema.feature_names.len();
    let (model, fit) = BoosterModel::fit(
        schema,
        &x_train,
        &y_train,
        Some((&x_test, &y_test)),
        &cfg.params,
    )?;
    model.save(&cfg.model_file)?;

    Ok(TrainingReport {
        fit,
        feature_count,
        categorical_features,
        model_file: cfg.model_file.clone(),
    })
}
