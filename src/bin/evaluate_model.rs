use std::path::Path;

use storecast::{
    init_logging, load_pipeline_config, logging_config_from_env, pipeline_config_from_env,
    run_evaluation,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging = logging_config_from_env();
    init_logging(&logging)?;

    let config = match std::env::args().nth(1) {
        Some(path) => load_pipeline_config(Path::new(&path))?,
        None => pipeline_config_from_env()?,
    };

    let metrics = run_evaluation(&config.evaluation)?;
    println!("RMSE={:.6} RMSPE={:.6}", metrics.rmse, metrics.rmspe);

    Ok(())
}
