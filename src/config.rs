//! Pipeline configuration: one immutable value, constructed once at process
//! start and threaded as an explicit argument into each stage. No ambient
//! or global lookup anywhere downstream.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::evaluation::EvaluationConfig;
use crate::features::FeatureConfig;
use crate::ingest::IngestionConfig;
use crate::training::TrainerConfig;
use crate::transform::DEFAULT_SKEWED_COLUMNS;
use crate::validation::ValidationConfig;

pub const CONFIG_PATH_ENV: &str = "STORECAST_CONFIG";

/// Wiring for the data-transformation stage: where the raw tables live,
/// where the outputs go, and the knobs of the split / compression /
/// feature sub-stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformationConfig {
    pub sales_file: PathBuf,
    pub store_file: PathBuf,
    pub cleaned_file: PathBuf,
    pub train_file: PathBuf,
    pub test_file: PathBuf,
    /// Held-out test proportion, strictly between 0 and 1.
    pub test_size: f64,
    pub skewed_columns: Vec<String>,
    pub features: FeatureConfig,
}

impl Default for TransformationConfig {
    fn default() -> Self {
        Self {
            sales_file: PathBuf::from("artifacts/data_ingestion/rossmann-store-sales/train.csv"),
            store_file: PathBuf::from("artifacts/data_ingestion/rossmann-store-sales/store.csv"),
            cleaned_file: PathBuf::from("artifacts/data_transformation/cleaned.csv"),
            train_file: PathBuf::from("artifacts/data_transformation/train.csv"),
            test_file: PathBuf::from("artifacts/data_transformation/test.csv"),
            test_size: 0.2,
            skewed_columns: DEFAULT_SKEWED_COLUMNS
                .iter()
                .map(|column| column.to_string())
                .collect(),
            features: FeatureConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub ingestion: IngestionConfig,
    pub validation: ValidationConfig,
    pub transformation: TransformationConfig,
    pub trainer: TrainerConfig,
    pub evaluation: EvaluationConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file at {path} is unavailable: {source}")]
    Unavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

pub fn load_pipeline_config(path: &Path) -> Result<PipelineConfig, ConfigError> {
    let bytes = fs::read(path).map_err(|source| ConfigError::Unavailable {
        path: path.to_path_buf(),
        source,
    })?;
    let config: PipelineConfig = serde_json::from_slice(&bytes)?;
    validate_pipeline_config(&config)?;
    Ok(config)
}

/// Loads the config from the path named by `STORECAST_CONFIG`, or falls
/// back to the built-in defaults when the variable is unset.
pub fn pipeline_config_from_env() -> Result<PipelineConfig, ConfigError> {
    match env::var(CONFIG_PATH_ENV) {
        Ok(path) if !path.trim().is_empty() => load_pipeline_config(Path::new(path.trim())),
        _ => Ok(PipelineConfig::default()),
    }
}

pub fn validate_pipeline_config(config: &PipelineConfig) -> Result<(), ConfigError> {
    let test_size = config.transformation.test_size;
    if !(test_size > 0.0 && test_size < 1.0) {
        return Err(ConfigError::Invalid(format!(
            "transformation.test_size must be strictly between 0 and 1, got {test_size}"
        )));
    }
    if config.transformation.features.spend_trend_window == 0 {
        return Err(ConfigError::Invalid(
            "transformation.features.spend_trend_window must be > 0".to_string(),
        ));
    }
    if config.validation.required_files.is_empty() {
        return Err(ConfigError::Invalid(
            "validation.required_files must not be empty".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::MissingPolicy;

    #[test]
    fn defaults_pass_validation() {
        let config = PipelineConfig::default();
        validate_pipeline_config(&config).expect("defaults must be valid");
        assert_eq!(config.transformation.test_size, 0.2);
        assert_eq!(
            config.transformation.skewed_columns,
            vec!["Sales", "Customers", "CompetitionDistance"]
        );
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let raw = r#"{
            "transformation": {
                "test_size": 0.3,
                "features": { "missing_policy": "ImputeZero" }
            }
        }"#;
        let config: PipelineConfig = serde_json::from_str(raw).expect("partial config parses");
        assert_eq!(config.transformation.test_size, 0.3);
        assert_eq!(
            config.transformation.features.missing_policy,
            MissingPolicy::ImputeZero
        );
        assert_eq!(config.transformation.features.spend_trend_window, 30);
        assert_eq!(config.trainer.target_column, "Sales");
    }

    #[test]
    fn json_round_trip_preserves_the_config() {
        let config = PipelineConfig::default();
        let raw = serde_json::to_string(&config).expect("config serializes");
        let parsed: PipelineConfig = serde_json::from_str(&raw).expect("config parses back");
        assert_eq!(parsed, config);
    }

    #[test]
    fn out_of_range_test_size_is_rejected() {
        for test_size in [0.0, 1.0, -0.1, 1.5] {
            let mut config = PipelineConfig::default();
            config.transformation.test_size = test_size;
            let err = validate_pipeline_config(&config).expect_err("must reject");
            assert!(matches!(err, ConfigError::Invalid(_)));
        }
    }
}
