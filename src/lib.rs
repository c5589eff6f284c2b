//! Storecast core crate.
//!
//! An offline batch pipeline that prepares daily retail store sales for
//! supervised regression and trains a boosted-tree model on the result:
//! - raw archive ingestion and required-file validation
//! - table loading, cleaning, store join, calendar features
//! - per-store leakage-safe feature engineering (expanding/lag/rolling)
//! - log1p compression, temporal train/test split
//! - gradient-boosted training and RMSE/RMSPE evaluation

mod config;
mod dataset;
mod evaluation;
mod features;
mod fsutil;
mod ingest;
mod model;
mod observability;
mod pipeline;
mod table;
mod training;
mod transform;
mod validation;

pub use config::{
    load_pipeline_config, pipeline_config_from_env, validate_pipeline_config, ConfigError,
    PipelineConfig, TransformationConfig, CONFIG_PATH_ENV,
};
pub use dataset::{
    load_sales_table, load_store_table, write_feature_rows, CompetitionOpen, DatasetError,
    DatedRow, FeatureRow, MergedRow, Promo2Since, SalesRecord, StoreProfile, StoreRecord,
    SALES_REQUIRED_COLUMNS, STORE_REQUIRED_COLUMNS,
};
pub use evaluation::{evaluate_model, rmse, rmspe, EvaluationConfig, EvaluationError, Metrics};
pub use features::{
    engineer_features, FeatureConfig, MissingPolicy, DEFAULT_SPEND_TREND_WINDOW,
};
pub use ingest::{
    ingest, ingest_with_fetcher, ArchiveSource, HttpFetcher, IngestError, IngestReport,
    IngestionConfig,
};
pub use model::{
    BoosterModel, BoosterParams, FitReport, Matrix, ModelError, ModelSchema,
};
pub use observability::{
    init_logging, log_run_start, logging_config_from_env, LogFormat, LoggingConfig,
    LoggingInitError,
};
pub use pipeline::{
    run_all, run_evaluation, run_ingestion, run_training, run_transformation, run_validation,
    PipelineError, RunSummary, TransformationReport,
};
pub use table::{Table, TableError};
pub use training::{
    build_design, infer_model_schema, train_model, TrainerConfig, TrainingError, TrainingReport,
};
pub use transform::{
    add_calendar_features, clean_sales, clean_stores, compress_skewed_columns,
    merge_sales_with_stores, split_by_time, SalesCleanReport, StoreCleanReport, TransformError,
    DEFAULT_SKEWED_COLUMNS,
};
pub use validation::{
    validate_required_files, ValidationConfig, ValidationError, ValidationReport,
};
