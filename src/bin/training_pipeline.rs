use std::path::Path;

use storecast::{
    init_logging, load_pipeline_config, log_run_start, logging_config_from_env,
    pipeline_config_from_env, run_all,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging = logging_config_from_env();
    init_logging(&logging)?;
    log_run_start(&logging);

    let config = match std::env::args().nth(1) {
        Some(path) => load_pipeline_config(Path::new(&path))?,
        None => pipeline_config_from_env()?,
    };

    let summary = run_all(&config)?;

    println!(
        "Pipeline complete | archive={:?} rows={} train={} test={} trees={} RMSE={:.4} RMSPE={:.4}",
        summary.ingestion.source,
        summary.transformation.rows_after_cleaning,
        summary.transformation.train_rows,
        summary.transformation.test_rows,
        summary.training.fit.iterations_kept,
        summary.metrics.rmse,
        summary.metrics.rmspe
    );

    Ok(())
}
