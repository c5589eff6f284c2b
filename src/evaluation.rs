//! Model-evaluation collaborator: regression metrics on the original scale.
//!
//! Predictions and ground truth leave the pipeline log1p-compressed, so
//! both are inverted with expm1 before scoring. RMSPE is computed only over
//! rows with non-zero ground truth.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::fsutil::write_atomic;
use crate::model::{BoosterModel, ModelError};
use crate::table::{Table, TableError};
use crate::training::{build_design, TrainingError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    pub model_file: PathBuf,
    pub test_file: PathBuf,
    pub metrics_file: PathBuf,
    pub target_column: String,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            model_file: PathBuf::from("artifacts/model_trainer/model.json"),
            test_file: PathBuf::from("artifacts/data_transformation/test.csv"),
            metrics_file: PathBuf::from("artifacts/model_evaluation/metrics.json"),
            target_column: "Sales".to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum EvaluationError {
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Table(#[from] TableError),
    #[error(transparent)]
    Design(#[from] TrainingError),
    #[error("metrics serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    #[serde(rename = "RMSE")]
    pub rmse: f64,
    #[serde(rename = "RMSPE")]
    pub rmspe: f64,
}

pub fn rmse(truth: &[f64], predictions: &[f64]) -> f64 {
    if truth.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = truth
        .iter()
        .zip(predictions.iter())
        .map(|(t, p)| {
            let d = t - p;
            d * d
        })
        .sum();
    (sum_sq / truth.len() as f64).sqrt()
}

/// Root mean squared percentage error over rows with non-zero truth. With
/// no such rows the mean is over an empty set and the result is NaN.
pub fn rmspe(truth: &[f64], predictions: &[f64]) -> f64 {
    let mut sum_sq = 0.0;
    let mut count = 0usize;
    for (t, p) in truth.iter().zip(predictions.iter()) {
        if *t != 0.0 {
            let ratio = (t - p) / t;
            sum_sq += ratio * ratio;
            count += 1;
        }
    }
    if count == 0 {
        return f64::NAN;
    }
    (sum_sq / count as f64).sqrt()
}

/// Loads the artifact and the test table, predicts, inverts the log1p
/// compression on both sides, scores and writes the metrics file.
pub fn evaluate_model(cfg: &EvaluationConfig) -> Result<Metrics, EvaluationError> {
    let model = BoosterModel::load(&cfg.model_file)?;
    let test = Table::read(&cfg.test_file)?;

    let (x_test, y_log) = build_design(&test, &model.schema, &cfg.target_column)?;
    let predictions_log = model.predict(&x_test)?;

    let truth: Vec<f64> = y_log.iter().map(|value| value.exp_m1()).collect();
    let predictions: Vec<f64> = predictions_log.iter().map(|value| value.exp_m1()).collect();

    let metrics = Metrics {
        rmse: rmse(&truth, &predictions),
        rmspe: rmspe(&truth, &predictions),
    };

    let bytes = serde_json::to_vec_pretty(&metrics)?;
    write_atomic(&cfg.metrics_file, &bytes)?;

    info!(
        component = "evaluation",
        event = "evaluation.metrics.written",
        path = %cfg.metrics_file.display(),
        rows = test.n_rows(),
        rmse = metrics.rmse,
        rmspe = metrics.rmspe
    );

    Ok(metrics)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rmspe_of_exact_predictions_is_zero() {
        let truth = [10.0, 20.0, 30.0];
        assert_eq!(rmspe(&truth, &truth), 0.0);
    }

    #[test]
    fn rmspe_ignores_zero_truth_rows() {
        let truth = [0.0, 10.0];
        let predictions = [123.0, 5.0];
        // Only the second row counts: ((10 - 5) / 10)^2 = 0.25.
        assert!((rmspe(&truth, &predictions) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn rmspe_with_no_nonzero_truth_is_nan() {
        assert!(rmspe(&[0.0, 0.0], &[1.0, 2.0]).is_nan());
    }

    #[test]
    fn rmse_matches_hand_computation() {
        let truth = [1.0, 2.0];
        let predictions = [2.0, 4.0];
        let expected = ((1.0 + 4.0) / 2.0_f64).sqrt();
        assert!((rmse(&truth, &predictions) - expected).abs() < 1e-12);
    }

    #[test]
    fn log1p_expm1_round_trip_recovers_non_negative_inputs() {
        for value in [0.0_f64, 0.5, 1.0, 42.0, 1.0e6] {
            let recovered = value.ln_1p().exp_m1();
            assert!((recovered - value).abs() <= value.abs() * 1e-12 + 1e-12);
        }
    }
}
