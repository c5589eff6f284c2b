//! Stage orchestration: strict ordering, abort on first failure.
//!
//! Each `run_*` function executes one stage against its slice of the
//! pipeline config; `run_all` chains them. Fatal errors surface with the
//! stage name in the error text and are never retried. Output files are
//! written atomically by the stages themselves, so an aborted stage leaves
//! nothing partial behind.

use thiserror::Error;
use tracing::info;

use crate::config::{PipelineConfig, TransformationConfig};
use crate::dataset::{load_sales_table, load_store_table, write_feature_rows, DatasetError};
use crate::evaluation::{evaluate_model, EvaluationConfig, EvaluationError, Metrics};
use crate::features::engineer_features;
use crate::ingest::{ingest, IngestError, IngestReport, IngestionConfig};
use crate::training::{train_model, TrainerConfig, TrainingError, TrainingReport};
use crate::transform::{
    add_calendar_features, clean_sales, clean_stores, compress_skewed_columns,
    merge_sales_with_stores, split_by_time, TransformError,
};
use crate::validation::{
    validate_required_files, ValidationConfig, ValidationError, ValidationReport,
};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("data ingestion stage failed: {0}")]
    Ingestion(#[from] IngestError),
    #[error("data validation stage failed: {0}")]
    Validation(#[from] ValidationError),
    #[error("data validation stage failed: missing required files: {0:?}")]
    MissingRequiredFiles(Vec<String>),
    #[error("data transformation stage failed: {0}")]
    Dataset(#[from] DatasetError),
    #[error("data transformation stage failed: {0}")]
    Transform(#[from] TransformError),
    #[error("model training stage failed: {0}")]
    Training(#[from] TrainingError),
    #[error("model evaluation stage failed: {0}")]
    Evaluation(#[from] EvaluationError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransformationReport {
    pub sales_rows_loaded: usize,
    pub store_rows_loaded: usize,
    pub rows_after_cleaning: usize,
    pub train_rows: usize,
    pub test_rows: usize,
}

#[derive(Debug)]
pub struct RunSummary {
    pub ingestion: IngestReport,
    pub validation: ValidationReport,
    pub transformation: TransformationReport,
    pub training: TrainingReport,
    pub metrics: Metrics,
}

pub fn run_ingestion(cfg: &IngestionConfig) -> Result<IngestReport, PipelineError> {
    stage_start("data_ingestion");
    let report = ingest(cfg)?;
    stage_finish("data_ingestion");
    Ok(report)
}

pub fn run_validation(cfg: &ValidationConfig) -> Result<ValidationReport, PipelineError> {
    stage_start("data_validation");
    let report = validate_required_files(cfg)?;
    stage_finish("data_validation");
    Ok(report)
}

/// Loader through Splitter, in dependency order, writing the compressed
/// full dataset and the temporal split.
pub fn run_transformation(
    cfg: &TransformationConfig,
) -> Result<TransformationReport, PipelineError> {
    stage_start("data_transformation");

    let sales = load_sales_table(&cfg.sales_file)?;
    let stores = load_store_table(&cfg.store_file)?;
    let sales_rows_loaded = sales.len();
    let store_rows_loaded = stores.len();

    let (sales, _sales_report) = clean_sales(sales);
    let (profiles, _store_report) = clean_stores(stores);

    let merged = merge_sales_with_stores(sales, profiles)?;
    let dated = add_calendar_features(merged);
    let engineered = engineer_features(dated, &cfg.features);
    let compressed = compress_skewed_columns(engineered, &cfg.skewed_columns);
    let rows_after_cleaning = compressed.len();

    write_feature_rows(&cfg.cleaned_file, &compressed)?;

    let (train, test) = split_by_time(compressed, cfg.test_size)?;
    write_feature_rows(&cfg.train_file, &train)?;
    write_feature_rows(&cfg.test_file, &test)?;

    let report = TransformationReport {
        sales_rows_loaded,
        store_rows_loaded,
        rows_after_cleaning,
        train_rows: train.len(),
        test_rows: test.len(),
    };
    stage_finish("data_transformation");
    Ok(report)
}

pub fn run_training(cfg: &TrainerConfig) -> Result<TrainingReport, PipelineError> {
    stage_start("model_training");
    let report = train_model(cfg)?;
    stage_finish("model_training");
    Ok(report)
}

pub fn run_evaluation(cfg: &EvaluationConfig) -> Result<Metrics, PipelineError> {
    stage_start("model_evaluation");
    let metrics = evaluate_model(cfg)?;
    stage_finish("model_evaluation");
    Ok(metrics)
}

/// Runs every stage in order. The validation status gates the rest of the
/// run: a missing raw file aborts before any transformation output exists.
pub fn run_all(cfg: &PipelineConfig) -> Result<RunSummary, PipelineError> {
    let ingestion = run_ingestion(&cfg.ingestion)?;

    let validation = run_validation(&cfg.validation)?;
    if !validation.status {
        return Err(PipelineError::MissingRequiredFiles(
            validation.missing_files.clone(),
        ));
    }

    let transformation = run_transformation(&cfg.transformation)?;
    let training = run_training(&cfg.trainer)?;
    let metrics = run_evaluation(&cfg.evaluation)?;

    Ok(RunSummary {
        ingestion,
        validation,
        transformation,
        training,
        metrics,
    })
}

fn stage_start(stage: &str) {
    info!(component = "pipeline", event = "stage.start", stage = stage);
}

fn stage_finish(stage: &str) {
    info!(component = "pipeline", event = "stage.finish", stage = stage);
}
