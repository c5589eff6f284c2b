#![cfg(feature = "live-ingest-tests")]

use storecast::{ingest, IngestionConfig};
use tempfile::tempdir;

#[test]
fn live_download_of_the_default_archive_extracts_the_raw_tables() {
    let dir = tempdir().expect("temp dir");
    let cfg = IngestionConfig {
        archive_file: dir.path().join("rossmann-store-sales.zip"),
        extract_dir: dir.path().to_path_buf(),
        ..IngestionConfig::default()
    };

    let report = ingest(&cfg).expect("live ingest succeeds");

    assert!(report.archive_bytes > 0);
    assert!(report
        .files_extracted
        .iter()
        .any(|name| name.ends_with("train.csv")));
    assert!(report
        .files_extracted
        .iter()
        .any(|name| name.ends_with("store.csv")));
}
