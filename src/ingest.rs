//! Raw dataset archive acquisition: download once, optionally verify, extract.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{info, warn};
use zip::ZipArchive;

use crate::fsutil::write_atomic;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestionConfig {
    pub source_url: String,
    pub archive_file: PathBuf,
    pub extract_dir: PathBuf,
    pub http_timeout_ms: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    /// When set, the archive on disk (cached or freshly downloaded) must
    /// hash to this value; a mismatch after download is fatal.
    pub expected_sha256: Option<String>,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            source_url:
                "https://github.com/entbappy/Branching-tutorial/raw/master/rossmann-store-sales.zip"
                    .to_string(),
            archive_file: PathBuf::from("artifacts/data_ingestion/rossmann-store-sales.zip"),
            extract_dir: PathBuf::from("artifacts/data_ingestion"),
            http_timeout_ms: 15_000,
            max_retries: 2,
            retry_backoff_ms: 200,
            expected_sha256: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("invalid ingestion config: {0}")]
    InvalidConfig(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP client build error: {0}")]
    HttpClientBuild(String),
    #[error("HTTP request failed for {url}: {message}")]
    HttpRequest { url: String, message: String },
    #[error("checksum mismatch for {path}: expected {expected}, actual {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("archive at {path} has no entries")]
    EmptyArchive { path: PathBuf },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArchiveSource {
    Cached,
    Downloaded,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IngestReport {
    pub archive_file: PathBuf,
    pub source: ArchiveSource,
    pub archive_bytes: u64,
    pub files_extracted: Vec<String>,
}

pub trait HttpFetcher {
    fn get_bytes(&self, url: &str) -> Result<Vec<u8>, IngestError>;
}

struct ReqwestBlockingFetcher {
    client: reqwest::blocking::Client,
}

impl ReqwestBlockingFetcher {
    fn new(timeout_ms: u64) -> Result<Self, IngestError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|err| IngestError::HttpClientBuild(err.to_string()))?;
        Ok(Self { client })
    }
}

impl HttpFetcher for ReqwestBlockingFetcher {
    fn get_bytes(&self, url: &str) -> Result<Vec<u8>, IngestError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| IngestError::HttpRequest {
                url: url.to_string(),
                message: err.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(IngestError::HttpRequest {
                url: url.to_string(),
                message: format!("status {}", response.status()),
            });
        }

        let bytes = response.bytes().map_err(|err| IngestError::HttpRequest {
            url: url.to_string(),
            message: err.to_string(),
        })?;
        Ok(bytes.to_vec())
    }
}

/// Downloads (or reuses) the raw archive and extracts it.
pub fn ingest(cfg: &IngestionConfig) -> Result<IngestReport, IngestError> {
    let fetcher = ReqwestBlockingFetcher::new(cfg.http_timeout_ms)?;
    ingest_with_fetcher(cfg, &fetcher)
}

/// Same as [`ingest`] with an injectable transport, so the flow is testable
/// without a network.
pub fn ingest_with_fetcher(
    cfg: &IngestionConfig,
    fetcher: &dyn HttpFetcher,
) -> Result<IngestReport, IngestError> {
    if cfg.source_url.trim().is_empty() {
        return Err(IngestError::InvalidConfig(
            "source_url must not be empty".to_string(),
        ));
    }

    info!(
        component = "ingest",
        event = "ingest.start",
        source_url = %cfg.source_url,
        archive_file = %cfg.archive_file.display(),
        extract_dir = %cfg.extract_dir.display()
    );

    let source = sync_archive(cfg, fetcher)?;
    let archive_bytes = fs::metadata(&cfg.archive_file)?.len();
    let files_extracted = extract_archive(&cfg.archive_file, &cfg.extract_dir)?;

    info!(
        component = "ingest",
        event = "ingest.finish",
        source = ?source,
        archive_bytes = archive_bytes,
        files_extracted = files_extracted.len()
    );

    Ok(IngestReport {
        archive_file: cfg.archive_file.clone(),
        source,
        archive_bytes,
        files_extracted,
    })
}

fn sync_archive(
    cfg: &IngestionConfig,
    fetcher: &dyn HttpFetcher,
) -> Result<ArchiveSource, IngestError> {
    if cfg.archive_file.exists() {
        match &cfg.expected_sha256 {
            None => {
                info!(
                    component = "ingest",
                    event = "ingest.archive.cached",
                    path = %cfg.archive_file.display()
                );
                return Ok(ArchiveSource::Cached);
            }
            Some(expected) => {
                let actual = file_sha256_hex(&cfg.archive_file)?;
                if actual.eq_ignore_ascii_case(expected) {
                    info!(
                        component = "ingest",
                        event = "ingest.archive.cached",
                        path = %cfg.archive_file.display()
                    );
                    return Ok(ArchiveSource::Cached);
                }
                warn!(
                    component = "ingest",
                    event = "ingest.archive.checksum_failed",
                    path = %cfg.archive_file.display(),
                    expected = %expected,
                    actual = %actual
                );
            }
        }
    }

    let bytes = fetch_bytes_with_retry(fetcher, &cfg.source_url, cfg)?;
    write_atomic(&cfg.archive_file, &bytes)?;

    if let Some(expected) = &cfg.expected_sha256 {
        let actual = file_sha256_hex(&cfg.archive_file)?;
        if !actual.eq_ignore_ascii_case(expected) {
            return Err(IngestError::ChecksumMismatch {
                path: cfg.archive_file.clone(),
                expected: expected.clone(),
                actual,
            });
        }
    }

    info!(
        component = "ingest",
        event = "ingest.archive.downloaded",
        path = %cfg.archive_file.display(),
        bytes = bytes.len()
    );
    Ok(ArchiveSource::Downloaded)
}

fn extract_archive(archive_file: &Path, extract_dir: &Path) -> Result<Vec<String>, IngestError> {
    let file = fs::File::open(archive_file)?;
    let mut zip = ZipArchive::new(file)?;
    if zip.is_empty() {
        return Err(IngestError::EmptyArchive {
            path: archive_file.to_path_buf(),
        });
    }

    let mut extracted = Vec::new();
    for idx in 0..zip.len() {
        let mut entry = zip.by_index(idx)?;
        if entry.is_dir() {
            continue;
        }
        let Some(relative) = entry.enclosed_name() else {
            // Entries escaping the extraction root are skipped, not written.
            warn!(
                component = "ingest",
                event = "ingest.extract.unsafe_entry_skipped",
                entry = %entry.name()
            );
            continue;
        };

        let mut bytes = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut bytes)?;

        let out_path = extract_dir.join(&relative);
        write_atomic(&out_path, &bytes)?;
        extracted.push(relative.to_string_lossy().to_string());
    }
    extracted.sort();

    Ok(extracted)
}

fn fetch_bytes_with_retry(
    fetcher: &dyn HttpFetcher,
    url: &str,
    cfg: &IngestionConfig,
) -> Result<Vec<u8>, IngestError> {
    let attempts = cfg.max_retries.saturating_add(1);
    let mut last_error = None;

    for attempt in 0..attempts {
        if attempt > 0 {
            sleep(Duration::from_millis(cfg.retry_backoff_ms));
        }
        match fetcher.get_bytes(url) {
            Ok(bytes) => return Ok(bytes),
            Err(err) => {
                warn!(
                    component = "ingest",
                    event = "ingest.fetch.retry",
                    url = url,
                    attempt = attempt + 1,
                    attempts = attempts,
                    error = %err
                );
                last_error = Some(err);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| IngestError::HttpRequest {
        url: url.to_string(),
        message: "no fetch attempt was made".to_string(),
    }))
}

fn file_sha256_hex(path: &Path) -> Result<String, IngestError> {
    let bytes = fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    Ok(hex::encode(hasher.finalize()))
}
