use std::fs;
use std::path::PathBuf;

use storecast::{
    build_design, infer_model_schema, train_model, BoosterModel, BoosterParams, ModelSchema,
    Table, TrainerConfig, TrainingError,
};
use tempfile::tempdir;

fn table(headers: &[&str], rows: &[&[&str]]) -> Table {
    Table {
        path: PathBuf::from("in-memory.csv"),
        headers: headers.iter().map(|h| h.to_string()).collect(),
        rows: rows
            .iter()
            .map(|row| row.iter().map(|cell| cell.to_string()).collect())
            .collect(),
    }
}

#[test]
fn schema_inference_excludes_target_and_date_and_finds_categoricals() {
    let train = table(
        &["Sales", "Date", "StoreType", "StateHoliday", "Promo"],
        &[
            &["8.1", "2015-01-01", "a", "0", "1"],
            &["7.9", "2015-01-02", "b", "a", "0"],
        ],
    );

    let schema = infer_model_schema(&train, "Sales", &["Date".to_string()]);

    assert_eq!(schema.feature_names, vec!["StoreType", "StateHoliday", "Promo"]);
    // StoreType by name, StateHoliday by non-numeric content; Promo stays
    // numeric.
    assert_eq!(
        schema.categorical_levels.get("StoreType"),
        Some(&vec!["a".to_string(), "b".to_string()])
    );
    assert_eq!(
        schema.categorical_levels.get("StateHoliday"),
        Some(&vec!["0".to_string(), "a".to_string()])
    );
    assert!(!schema.categorical_levels.contains_key("Promo"));
}

#[test]
fn design_matrix_encodes_levels_ordinally_and_maps_gaps_to_nan() {
    let train = table(
        &["Sales", "StoreType", "Promo"],
        &[&["8.0", "a", "1"], &["7.0", "b", "0"]],
    );
    let schema = infer_model_schema(&train, "Sales", &[]);

    let probe = table(
        &["Sales", "StoreType", "Promo"],
        &[
            &["6.0", "b", "1"],
            &["5.0", "z", ""], // unseen level, missing numeric
        ],
    );
    let (x, y) = build_design(&probe, &schema, "Sales").expect("design builds");

    assert_eq!(y, vec![6.0, 5.0]);
    assert_eq!(x.get(0, 0), 1.0); // "b" is the second sorted level
    assert_eq!(x.get(0, 1), 1.0);
    assert!(x.get(1, 0).is_nan());
    assert!(x.get(1, 1).is_nan());
}

#[test]
fn non_numeric_target_is_rejected_with_position() {
    let bad = table(&["Sales", "Promo"], &[&["8.0", "1"], &["oops", "0"]]);
    let schema = infer_model_schema(&bad, "Sales", &[]);

    let err = build_design(&bad, &schema, "Sales").expect_err("must reject");
    match err {
        TrainingError::InvalidTarget { column, value, row } => {
            assert_eq!(column, "Sales");
            assert_eq!(value, "oops");
            assert_eq!(row, 1);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn artifact_round_trip_preserves_predictions() {
    let dir = tempdir().expect("temp dir");
    let train = table(
        &["Sales", "Promo", "StoreType"],
        &[
            &["1.0", "0", "a"],
            &["2.0", "1", "a"],
            &["5.0", "0", "b"],
            &["6.0", "1", "b"],
        ],
    );
    let schema = infer_model_schema(&train, "Sales", &[]);
    let (x, y) = build_design(&train, &schema, "Sales").expect("design builds");

    let params = BoosterParams {
        iterations: 25,
        learning_rate: 0.3,
        depth: 2,
        early_stopping_rounds: 0,
        verbose_every: 0,
        ..BoosterParams::default()
    };
    let (model, _) = BoosterModel::fit(schema, &x, &y, None, &params).expect("fit succeeds");

    let path = dir.path().join("model.json");
    model.save(&path).expect("artifact saves");
    let restored = BoosterModel::load(&path).expect("artifact loads");

    assert_eq!(restored, model);
    assert_eq!(
        restored.predict(&x).expect("predict succeeds"),
        model.predict(&x).expect("predict succeeds")
    );
}

#[test]
fn train_model_reads_tables_fits_and_persists() {
    let dir = tempdir().expect("temp dir");
    let train_file = dir.path().join("train.csv");
    let test_file = dir.path().join("test.csv");
    let model_file = dir.path().join("model.json");

    let mut train_csv = String::from("Sales,Date,Promo,StoreType\n");
    for idx in 0..40 {
        let promo = idx % 2;
        let store_type = if idx % 4 < 2 { "a" } else { "b" };
        let sales = 3.0 + f64::from(promo) + if store_type == "b" { 2.0 } else { 0.0 };
        train_csv.push_str(&format!("{sales},2015-01-{:02},{promo},{store_type}\n", idx % 28 + 1));
    }
    fs::write(&train_file, &train_csv).expect("train table written");
    fs::write(&test_file, &train_csv).expect("test table written");

    let cfg = TrainerConfig {
        train_file,
        test_file,
        model_file: model_file.clone(),
        params: BoosterParams {
            iterations: 40,
            learning_rate: 0.3,
            depth: 3,
            early_stopping_rounds: 10,
            verbose_every: 0,
            ..BoosterParams::default()
        },
        ..TrainerConfig::default()
    };

    let report = train_model(&cfg).expect("training succeeds");

    assert_eq!(report.feature_count, 2); // Promo + StoreType; Date dropped
    assert_eq!(report.categorical_features, vec!["StoreType".to_string()]);
    assert!(report.fit.iterations_kept >= 1);
    assert!(report.fit.train_rmse < 0.5);
    assert!(model_file.exists());

    let model = BoosterModel::load(&model_file).expect("artifact loads");
    assert_eq!(model.schema.feature_names, vec!["Promo", "StoreType"]);
}

#[test]
fn feature_count_mismatch_is_rejected_at_prediction_time() {
    let schema = ModelSchema {
        feature_names: vec!["Promo".to_string()],
        categorical_levels: Default::default(),
    };
    let x = storecast::Matrix::from_row_major(vec![1.0, 0.0], 1).expect("valid matrix");
    let (model, _) = BoosterModel::fit(
        schema,
        &x,
        &[1.0, 2.0],
        None,
        &BoosterParams {
            iterations: 5,
            verbose_every: 0,
            early_stopping_rounds: 0,
            ..BoosterParams::default()
        },
    )
    .expect("fit succeeds");

    let wide = storecast::Matrix::from_row_major(vec![1.0, 0.0], 2).expect("valid matrix");
    let err = model.predict(&wide).expect_err("must reject");
    assert!(matches!(err, storecast::ModelError::FeatureMismatch { .. }));
}
