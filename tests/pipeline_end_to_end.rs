use std::fs;
use std::path::Path;

use storecast::{
    run_evaluation, run_training, run_transformation, BoosterParams, EvaluationConfig,
    PipelineError, TrainerConfig, TransformationConfig,
};
use tempfile::tempdir;

fn write_sales_table(path: &Path, include_zero_row: bool) {
    let mut csv = String::from("Store,DayOfWeek,Date,Sales,Customers,Open,Promo,StateHoliday,SchoolHoliday\n");
    for store in [1u32, 2] {
        for day in 1..=20u32 {
            // Cycle through a small value set so the top value is tied and
            // the tail trim keeps every regular row.
            let sales = 40 + store * 10 + (day % 5) * 3;
            let customers = 10 + store + day % 4;
            csv.push_str(&format!(
                "{store},{},2015-01-{day:02},{sales},{customers},1,{},0,0\n",
                (day - 1) % 7 + 1,
                day % 2
            ));
        }
    }
    if include_zero_row {
        csv.push_str("1,6,2015-01-21,0,0,0,0,0,0\n");
    }
    fs::write(path, csv).expect("sales table written");
}

fn write_store_table(path: &Path) {
    let csv = "Store,StoreType,Assortment,CompetitionDistance,CompetitionOpenSinceMonth,CompetitionOpenSinceYear,Promo2,Promo2SinceWeek,Promo2SinceYear,PromoInterval\n\
               1,a,c,1200,6,2014,0,,,\n\
               2,b,a,,,,1,14,2012,\"Jan,Apr,Jul,Oct\"\n";
    fs::write(path, csv).expect("store table written");
}

fn transformation_config(root: &Path) -> TransformationConfig {
    TransformationConfig {
        sales_file: root.join("sales.csv"),
        store_file: root.join("store.csv"),
        cleaned_file: root.join("out/cleaned.csv"),
        train_file: root.join("out/train.csv"),
        test_file: root.join("out/test.csv"),
        test_size: 0.2,
        ..TransformationConfig::default()
    }
}

fn header_of(path: &Path) -> Vec<String> {
    let mut reader = csv::Reader::from_path(path).expect("output readable");
    reader
        .headers()
        .expect("header row present")
        .iter()
        .map(|column| column.to_string())
        .collect()
}

#[test]
fn transformation_writes_cleaned_and_split_outputs() {
    let dir = tempdir().expect("temp dir");
    let root = dir.path();
    write_sales_table(&root.join("sales.csv"), true);
    write_store_table(&root.join("store.csv"));

    let cfg = transformation_config(root);
    let report = run_transformation(&cfg).expect("transformation succeeds");

    assert_eq!(report.sales_rows_loaded, 41);
    assert_eq!(report.store_rows_loaded, 2);
    assert_eq!(report.rows_after_cleaning, 40);
    assert_eq!(report.train_rows, 32); // floor(40 * 0.8)
    assert_eq!(report.test_rows, 8);

    for output in ["out/cleaned.csv", "out/train.csv", "out/test.csv"] {
        assert!(root.join(output).exists(), "{output} missing");
    }

    let header = header_of(&root.join("out/cleaned.csv"));
    for derived in [
        "CompetitionOpenDuration",
        "AvgSalesPerStore",
        "MedSalesPerStore",
        "LastDaySalesPerStore",
        "LastWeekCustomersPerStore",
        "Store_AvgCustSpent_Trend",
        "Week",
    ] {
        assert!(header.iter().any(|column| column == derived), "{derived} missing");
    }
    // Pruned columns never reach the output.
    for dropped in [
        "Open",
        "CompetitionOpenSinceMonth",
        "CompetitionOpenSinceYear",
    ] {
        assert!(!header.iter().any(|column| column == dropped), "{dropped} present");
    }
}

#[test]
fn schema_mismatch_aborts_before_any_output_is_written() {
    let dir = tempdir().expect("temp dir");
    let root = dir.path();
    write_sales_table(&root.join("sales.csv"), false);
    // Store table missing the Assortment column entirely.
    fs::write(
        root.join("store.csv"),
        "Store,StoreType,CompetitionDistance\n1,a,1200\n",
    )
    .expect("store table written");

    let cfg = transformation_config(root);
    let err = run_transformation(&cfg).expect_err("must abort");
    match err {
        PipelineError::Dataset(inner) => {
            let text = inner.to_string();
            assert!(text.contains("Assortment"), "unexpected message: {text}");
        }
        other => panic!("unexpected error: {other}"),
    }

    for output in ["out/cleaned.csv", "out/train.csv", "out/test.csv"] {
        assert!(!root.join(output).exists(), "{output} should not exist");
    }
}

#[test]
fn transformation_training_and_evaluation_chain_end_to_end() {
    let dir = tempdir().expect("temp dir");
    let root = dir.path();
    write_sales_table(&root.join("sales.csv"), true);
    write_store_table(&root.join("store.csv"));

    let transform_cfg = transformation_config(root);
    run_transformation(&transform_cfg).expect("transformation succeeds");

    let trainer_cfg = TrainerConfig {
        train_file: root.join("out/train.csv"),
        test_file: root.join("out/test.csv"),
        model_file: root.join("out/model.json"),
        params: BoosterParams {
            iterations: 30,
            learning_rate: 0.2,
            depth: 3,
            early_stopping_rounds: 10,
            verbose_every: 0,
            ..BoosterParams::default()
        },
        ..TrainerConfig::default()
    };
    let training = run_training(&trainer_cfg).expect("training succeeds");
    assert!(root.join("out/model.json").exists());
    assert!(training.fit.iterations_kept >= 1);
    assert!(training
        .categorical_features
        .iter()
        .any(|name| name == "StoreType"));

    let eval_cfg = EvaluationConfig {
        model_file: root.join("out/model.json"),
        test_file: root.join("out/test.csv"),
        metrics_file: root.join("out/metrics.json"),
        ..EvaluationConfig::default()
    };
    let metrics = run_evaluation(&eval_cfg).expect("evaluation succeeds");

    assert!(metrics.rmse.is_finite());
    assert!(metrics.rmse >= 0.0);
    assert!(metrics.rmspe.is_finite());
    assert!(metrics.rmspe >= 0.0);

    let raw = fs::read_to_string(root.join("out/metrics.json")).expect("metrics readable");
    let parsed: serde_json::Value = serde_json::from_str(&raw).expect("metrics are JSON");
    assert!(parsed.get("RMSE").is_some());
    assert!(parsed.get("RMSPE").is_some());
}
