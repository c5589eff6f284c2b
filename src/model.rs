//! Gradient-boosted regression trees with a JSON model artifact.
//!
//! A deliberately small booster: squared-error loss, depth-limited exact
//! greedy trees fitted to residuals, optional early stopping against an
//! evaluation set. There is no row or column subsampling, so training is
//! fully deterministic. Missing feature values (NaN) take the left branch
//! at every split.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::fsutil::write_atomic;

const MIN_GAIN: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoosterParams {
    pub iterations: u32,
    pub learning_rate: f64,
    pub depth: u32,
    pub loss_function: String,
    /// 0 disables early stopping.
    pub early_stopping_rounds: u32,
    /// 0 silences per-round progress events.
    pub verbose_every: u32,
}

impl Default for BoosterParams {
    fn default() -> Self {
        Self {
            iterations: 1_000,
            learning_rate: 0.1,
            depth: 6,
            loss_function: "RMSE".to_string(),
            early_stopping_rounds: 50,
            verbose_every: 100,
        }
    }
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("invalid booster parameters: {0}")]
    InvalidParams(String),
    #[error("unsupported loss function {0}; only RMSE is implemented")]
    UnsupportedLoss(String),
    #[error("training set is empty")]
    EmptyTrainingSet,
    #[error("feature count mismatch: model expects {expected} features, got {actual}")]
    FeatureMismatch { expected: usize, actual: usize },
    #[error("model artifact at {path} is unavailable: {source}")]
    ArtifactUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("model artifact serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Dense row-major feature matrix. NaN encodes a missing value.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    n_rows: usize,
    n_cols: usize,
    values: Vec<f64>,
}

impl Matrix {
    pub fn from_row_major(values: Vec<f64>, n_cols: usize) -> Result<Self, ModelError> {
        if n_cols == 0 || values.len() % n_cols != 0 {
            return Err(ModelError::InvalidParams(format!(
                "matrix of {} values cannot have {} columns",
                values.len(),
                n_cols
            )));
        }
        Ok(Self {
            n_rows: values.len() / n_cols,
            n_cols,
            values,
        })
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_cols(&self) -> usize {
        self.n_cols
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.values[row * self.n_cols + col]
    }
}

/// How the design matrix was encoded: feature order plus, for each
/// categorical feature, its ordinal level list from the training table.
/// Stored in the artifact so evaluation encodes identically.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ModelSchema {
    pub feature_names: Vec<String>,
    pub categorical_levels: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct TreeNode {
    feature: usize,
    threshold: f64,
    left: usize,
    right: usize,
    value: f64,
    leaf: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct RegressionTree {
    nodes: Vec<TreeNode>,
}

impl RegressionTree {
    fn predict_row(&self, x: &Matrix, row: usize) -> f64 {
        let mut node = 0usize;
        loop {
            let current = self.nodes[node];
            if current.leaf {
                return current.value;
            }
            let value = x.get(row, current.feature);
            node = if value.is_nan() || value <= current.threshold {
                current.left
            } else {
                current.right
            };
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoosterModel {
    pub params: BoosterParams,
    pub schema: ModelSchema,
    base_prediction: f64,
    trees: Vec<RegressionTree>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FitReport {
    pub iterations_run: u32,
    pub iterations_kept: u32,
    pub train_rmse: f64,
    pub best_eval_rmse: Option<f64>,
}

impl BoosterModel {
    /// Fits residual-boosted trees. With an evaluation set and a non-zero
    /// early-stopping window, training stops once the eval RMSE has not
    /// improved for that many rounds and the model keeps the best prefix.
    pub fn fit(
        schema: ModelSchema,
        x: &Matrix,
        y: &[f64],
        eval: Option<(&Matrix, &[f64])>,
        params: &BoosterParams,
    ) -> Result<(Self, FitReport), ModelError> {
        validate_params(params)?;
        if x.n_rows() == 0 {
            return Err(ModelError::EmptyTrainingSet);
        }
        if y.len() != x.n_rows() {
            return Err(ModelError::InvalidParams(format!(
                "target has {} values for {} rows",
                y.len(),
                x.n_rows()
            )));
        }
        if schema.feature_names.len() != x.n_cols() {
            return Err(ModelError::FeatureMismatch {
                expected: schema.feature_names.len(),
                actual: x.n_cols(),
            });
        }
        if let Some((eval_x, eval_y)) = eval {
            if eval_y.len() != eval_x.n_rows() || eval_x.n_cols() != x.n_cols() {
                return Err(ModelError::InvalidParams(
                    "evaluation set shape does not match the training set".to_string(),
                ));
            }
        }

        let n = x.n_rows();
        let base_prediction = y.iter().sum::<f64>() / n as f64;
        let mut predictions = vec![base_prediction; n];
        let mut eval_predictions = eval.map(|(eval_x, _)| vec![base_prediction; eval_x.n_rows()]);

        info!(
            component = "model",
            event = "model.fit.start",
            rows = n,
            features = x.n_cols(),
            iterations = params.iterations,
            learning_rate = params.learning_rate,
            depth = params.depth,
            early_stopping_rounds = params.early_stopping_rounds
        );

        let mut trees: Vec<RegressionTree> = Vec::new();
        let mut best_eval = f64::INFINITY;
        let mut best_len = 0usize;
        let mut rounds_without_improvement = 0u32;
        let mut iterations_run = 0u32;

        for iteration in 0..params.iterations {
            let residuals: Vec<f64> = y
                .iter()
                .zip(predictions.iter())
                .map(|(target, prediction)| target - prediction)
                .collect();

            let tree = fit_tree(x, &residuals, params.depth as usize);
            for (row, prediction) in predictions.iter_mut().enumerate() {
                *prediction += params.learning_rate * tree.predict_row(x, row);
            }
            trees.push(tree);
            iterations_run = iteration + 1;

            let mut eval_rmse = None;
            if let (Some((eval_x, eval_y)), Some(eval_preds)) = (eval, eval_predictions.as_mut()) {
                let tree = trees.last().expect("tree pushed this iteration");
                for (row, prediction) in eval_preds.iter_mut().enumerate() {
                    *prediction += params.learning_rate * tree.predict_row(eval_x, row);
                }
                let rmse = root_mean_squared_error(eval_y, eval_preds);
                eval_rmse = Some(rmse);

                if rmse + MIN_GAIN < best_eval {
                    best_eval = rmse;
                    best_len = trees.len();
                    rounds_without_improvement = 0;
                } else {
                    rounds_without_improvement += 1;
                    if params.early_stopping_rounds > 0
                        && rounds_without_improvement >= params.early_stopping_rounds
                    {
                        info!(
                            component = "model",
                            event = "model.fit.early_stop",
                            iteration = iterations_run,
                            best_iteration = best_len,
                            best_eval_rmse = best_eval
                        );
                        break;
                    }
                }
            }

            if params.verbose_every > 0 && iterations_run % params.verbose_every == 0 {
                info!(
                    component = "model",
                    event = "model.fit.progress",
                    iteration = iterations_run,
                    train_rmse = root_mean_squared_error(y, &predictions),
                    eval_rmse = ?eval_rmse
                );
            }
        }

        if eval.is_some() && params.early_stopping_rounds > 0 && best_len > 0 {
            trees.truncate(best_len);
        }

        let model = Self {
            params: params.clone(),
            schema,
            base_prediction,
            trees,
        };
        let train_rmse = {
            let final_predictions = model.predict(x)?;
            root_mean_squared_error(y, &final_predictions)
        };
        let report = FitReport {
            iterations_run,
            iterations_kept: model.trees.len() as u32,
            train_rmse,
            best_eval_rmse: eval.map(|_| best_eval).filter(|rmse| rmse.is_finite()),
        };

        info!(
            component = "model",
            event = "model.fit.finish",
            iterations_run = report.iterations_run,
            iterations_kept = report.iterations_kept,
            train_rmse = report.train_rmse,
            best_eval_rmse = ?report.best_eval_rmse
        );

        Ok((model, report))
    }

    pub fn predict(&self, x: &Matrix) -> Result<Vec<f64>, ModelError> {
        if x.n_cols() != self.schema.feature_names.len() {
            return Err(ModelError::FeatureMismatch {
                expected: self.schema.feature_names.len(),
                actual: x.n_cols(),
            });
        }

        let mut out = vec![self.base_prediction; x.n_rows()];
        for tree in &self.trees {
            for (row, prediction) in out.iter_mut().enumerate() {
                *prediction += self.params.learning_rate * tree.predict_row(x, row);
            }
        }
        Ok(out)
    }

    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }

    pub fn save(&self, path: &Path) -> Result<(), ModelError> {
        let bytes = serde_json::to_vec_pretty(self)?;
        write_atomic(path, &bytes)?;
        info!(
            component = "model",
            event = "model.artifact.saved",
            path = %path.display(),
            trees = self.trees.len()
        );
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let bytes = fs::read(path).map_err(|source| ModelError::ArtifactUnavailable {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

fn validate_params(params: &BoosterParams) -> Result<(), ModelError> {
    if params.loss_function != "RMSE" {
        return Err(ModelError::UnsupportedLoss(params.loss_function.clone()));
    }
    if params.iterations == 0 {
        return Err(ModelError::InvalidParams("iterations must be > 0".to_string()));
    }
    if !(params.learning_rate > 0.0 && params.learning_rate.is_finite()) {
        return Err(ModelError::InvalidParams(
            "learning_rate must be a positive finite number".to_string(),
        ));
    }
    if params.depth == 0 {
        return Err(ModelError::InvalidParams("depth must be > 0".to_string()));
    }
    Ok(())
}

fn root_mean_squared_error(truth: &[f64], predictions: &[f64]) -> f64 {
    let n = truth.len();
    if n == 0 {
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
    (sum_sq / n as f64).sqrt()
}

fn fit_tree(x: &Matrix, targets: &[f64], max_depth: usize) -> RegressionTree {
    let indices: Vec<usize> = (0..x.n_rows()).collect();
    let mut nodes = Vec::new();
    build_node(x, targets, &indices, max_depth, &mut nodes);
    RegressionTree { nodes }
}

fn build_node(
    x: &Matrix,
    targets: &[f64],
    indices: &[usize],
    depth_left: usize,
    nodes: &mut Vec<TreeNode>,
) -> usize {
    let id = nodes.len();
    nodes.push(TreeNode {
        feature: 0,
        threshold: 0.0,
        left: 0,
        right: 0,
        value: mean(targets, indices),
        leaf: true,
    });

    if depth_left == 0 || indices.len() < 2 {
        return id;
    }

    let Some(split) = best_split(x, targets, indices) else {
        return id;
    };

    let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = indices.iter().partition(|&&row| {
        let value = x.get(row, split.feature);
        value.is_nan() || value <= split.threshold
    });

    let left = build_node(x, targets, &left_rows, depth_left - 1, nodes);
    let right = build_node(x, targets, &right_rows, depth_left - 1, nodes);

    nodes[id] = TreeNode {
        feature: split.feature,
        threshold: split.threshold,
        left,
        right,
        value: 0.0,
        leaf: false,
    };

    id
}

struct Split {
    feature: usize,
    threshold: f64,
}

/// Exact greedy split search: for each feature, sort the present values and
/// scan the prefix sums for the largest sum-of-squared-error reduction.
/// Rows with a missing value accompany the left side of every candidate.
fn best_split(x: &Matrix, targets: &[f64], indices: &[usize]) -> Option<Split> {
    let total_sum: f64 = indices.iter().map(|&row| targets[row]).sum();
    let total_count = indices.len();
    let parent_term = total_sum * total_sum / total_count as f64;

    let mut best_gain = MIN_GAIN;
    let mut best: Option<Split> = None;

    for feature in 0..x.n_cols() {
        let mut present: Vec<(f64, f64)> = Vec::with_capacity(total_count);
        let mut missing_sum = 0.0;
        let mut missing_count = 0usize;
        for &row in indices {
            let value = x.get(row, feature);
            if value.is_nan() {
                missing_sum += targets[row];
                missing_count += 1;
            } else {
                present.push((value, targets[row]));
            }
        }
        if present.len() < 2 {
            continue;
        }
        present.sort_by(|a, b| a.0.total_cmp(&b.0));

        let present_count = present.len();
        let mut prefix_sum = 0.0;

        for k in 1..present_count {
            let (value, target) = present[k - 1];
            prefix_sum += target;

            let next_value = present[k].0;
            if value == next_value {
                continue;
            }

            let left_count = missing_count + k;
            let right_count = present_count - k;
            let left_sum = missing_sum + prefix_sum;
            let right_sum = total_sum - left_sum;

            // The raw squared sums cancel between parent and children, so
            // the SSE reduction needs only the (sum^2 / count) terms.
            let gain = left_sum * left_sum / left_count as f64
                + right_sum * right_sum / right_count as f64
                - parent_term;

            if gain.is_finite() && gain > best_gain {
                best_gain = gain;
                best = Some(Split {
                    feature,
                    threshold: (value + next_value) / 2.0,
                });
            }
        }
    }

    best
}

fn mean(targets: &[f64], indices: &[usize]) -> f64 {
    if indices.is_empty() {
        return 0.0;
    }
    indices.iter().map(|&row| targets[row]).sum::<f64>() / indices.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema(n: usize) -> ModelSchema {
        ModelSchema {
            feature_names: (0..n).map(|idx| format!("f{idx}")).collect(),
            categorical_levels: BTreeMap::new(),
        }
    }

    #[test]
    fn constant_target_predicts_the_constant() {
        let x = Matrix::from_row_major(vec![1.0, 2.0, 3.0, 4.0], 1).expect("valid matrix");
        let y = vec![5.0; 4];
        let params = BoosterParams {
            iterations: 10,
            ..BoosterParams::default()
        };

        let (model, report) =
            BoosterModel::fit(schema(1), &x, &y, None, &params).expect("fit succeeds");
        let predictions = model.predict(&x).expect("predict succeeds");
        for prediction in predictions {
            assert!((prediction - 5.0).abs() < 1e-9);
        }
        assert!(report.train_rmse < 1e-9);
    }

    #[test]
    fn splits_recover_a_step_function() {
        let values: Vec<f64> = (0..20).map(f64::from).collect();
        let x = Matrix::from_row_major(values.clone(), 1).expect("valid matrix");
        let y: Vec<f64> = values
            .iter()
            .map(|&v| if v < 10.0 { 1.0 } else { 9.0 })
            .collect();
        let params = BoosterParams {
            iterations: 50,
            learning_rate: 0.3,
            depth: 2,
            early_stopping_rounds: 0,
            verbose_every: 0,
            ..BoosterParams::default()
        };

        let (model, _) = BoosterModel::fit(schema(1), &x, &y, None, &params).expect("fit succeeds");
        let predictions = model.predict(&x).expect("predict succeeds");
        for (prediction, target) in predictions.iter().zip(y.iter()) {
            assert!(
                (prediction - target).abs() < 0.1,
                "prediction {prediction} too far from {target}"
            );
        }
    }

    #[test]
    fn missing_values_route_left_deterministically() {
        let x = Matrix::from_row_major(vec![1.0, 2.0, 10.0, 11.0], 1).expect("valid matrix");
        let y = vec![1.0, 1.0, 9.0, 9.0];
        let params = BoosterParams {
            iterations: 30,
            learning_rate: 0.5,
            depth: 1,
            early_stopping_rounds: 0,
            verbose_every: 0,
            ..BoosterParams::default()
        };
        let (model, _) = BoosterModel::fit(schema(1), &x, &y, None, &params).expect("fit succeeds");

        let probe = Matrix::from_row_major(vec![f64::NAN], 1).expect("valid matrix");
        let prediction = model.predict(&probe).expect("predict succeeds")[0];
        assert!(
            (prediction - 1.0).abs() < 0.1,
            "NaN probe predicted {prediction}, expected the left (low) leaf"
        );
    }

    #[test]
    fn rejects_unsupported_loss_and_bad_shapes() {
        let x = Matrix::from_row_major(vec![1.0, 2.0], 1).expect("valid matrix");
        let params = BoosterParams {
            loss_function: "MAE".to_string(),
            ..BoosterParams::default()
        };
        let err = BoosterModel::fit(schema(1), &x, &[1.0, 2.0], None, &params)
            .expect_err("must reject loss");
        assert!(matches!(err, ModelError::UnsupportedLoss(_)));

        let err = BoosterModel::fit(schema(1), &x, &[1.0], None, &BoosterParams::default())
            .expect_err("must reject shape");
        assert!(matches!(err, ModelError::InvalidParams(_)));
    }
}
