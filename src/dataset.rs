//! Raw table loading and the typed row model shared by the pipeline stages.
//!
//! The loader coerces delimited text into typed records and nothing else;
//! semantic repairs happen in the cleaning stage. Each pipeline stage
//! consumes one row type and returns the next, so no stage mutates a
//! dataset it does not own.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use csv::StringRecord;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::fsutil::write_atomic;

pub const SALES_REQUIRED_COLUMNS: [&str; 6] =
    ["Store", "Date", "Sales", "Customers", "Open", "Promo"];
pub const STORE_REQUIRED_COLUMNS: [&str; 10] = [
    "Store",
    "StoreType",
    "Assortment",
    "CompetitionDistance",
    "CompetitionOpenSinceMonth",
    "CompetitionOpenSinceYear",
    "Promo2",
    "Promo2SinceWeek",
    "Promo2SinceYear",
    "PromoInterval",
];

/// One store-day observation from the raw sales table.
#[derive(Debug, Clone, PartialEq)]
pub struct SalesRecord {
    pub store_id: u32,
    pub day_of_week: u8,
    /// Raw date text; parsed into a calendar date by the time featurizer.
    pub date: String,
    pub sales: f64,
    pub customers: u32,
    pub open: u8,
    pub promo: u8,
    pub state_holiday: String,
    pub school_holiday: u8,
}

/// One store from the raw store-metadata table, before cleaning.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreRecord {
    pub store_id: u32,
    pub store_type: String,
    pub assortment: String,
    pub competition_distance: Option<f64>,
    pub competition_open_since_month: Option<u32>,
    pub competition_open_since_year: Option<i32>,
    pub promo2: u8,
    pub promo2_since_week: Option<u32>,
    pub promo2_since_year: Option<i32>,
    pub promo_interval: Option<String>,
}

/// Competition exposure after cleaning. The raw tables encode "no recorded
/// opening" as 0/missing; internally that sentinel becomes an explicit
/// variant and only reappears at the CSV boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompetitionOpen {
    NotRecorded,
    Since { year: i32, month: u32 },
}

/// Promo2 enrollment start after cleaning, same sentinel treatment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Promo2Since {
    NotRecorded,
    Since { year: i32, week: u32 },
}

/// Store metadata after cleaning: distance imputed, sentinels made explicit.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreProfile {
    pub store_id: u32,
    pub store_type: String,
    pub assortment: String,
    pub competition_distance: Option<f64>,
    pub competition_open: CompetitionOpen,
    pub promo2: u8,
    pub promo2_since: Promo2Since,
    pub promo_interval: Option<String>,
}

/// A sales row joined with its store profile. `store` is `None` for sales
/// rows whose store id has no metadata; the join never duplicates rows.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedRow {
    pub store_id: u32,
    pub day_of_week: u8,
    pub date: String,
    pub sales: f64,
    pub customers: u32,
    pub open: u8,
    pub promo: u8,
    pub state_holiday: String,
    pub school_holiday: u8,
    pub store: Option<StoreProfile>,
}

/// A merged row with the parsed calendar date and derived calendar fields.
/// Rows whose raw date failed to parse keep `None` and sort last.
#[derive(Debug, Clone, PartialEq)]
pub struct DatedRow {
    pub store_id: u32,
    pub day_of_week: u8,
    pub date: Option<NaiveDate>,
    pub sales: f64,
    pub customers: u32,
    pub open: u8,
    pub promo: u8,
    pub state_holiday: String,
    pub school_holiday: u8,
    pub year: Option<i32>,
    pub month: Option<u32>,
    pub iso_week: Option<u32>,
    pub store: Option<StoreProfile>,
}

/// The engineered row written to the cleaned/train/test files. The raw
/// `Open` flag and the raw competition-open year/month are intentionally
/// absent; they are fully absorbed into `CompetitionOpenDuration`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureRow {
    #[serde(rename = "Store")]
    pub store_id: u32,
    #[serde(rename = "DayOfWeek")]
    pub day_of_week: u8,
    #[serde(rename = "Date")]
    pub date: Option<NaiveDate>,
    #[serde(rename = "Sales")]
    pub sales: f64,
    #[serde(rename = "Customers")]
    pub customers: f64,
    #[serde(rename = "Promo")]
    pub promo: u8,
    #[serde(rename = "StateHoliday")]
    pub state_holiday: String,
    #[serde(rename = "SchoolHoliday")]
    pub school_holiday: u8,
    #[serde(rename = "StoreType")]
    pub store_type: Option<String>,
    #[serde(rename = "Assortment")]
    pub assortment: Option<String>,
    #[serde(rename = "CompetitionDistance")]
    pub competition_distance: Option<f64>,
    #[serde(rename = "Promo2")]
    pub promo2: Option<u8>,
    #[serde(rename = "Promo2SinceWeek")]
    pub promo2_since_week: Option<u32>,
    #[serde(rename = "Promo2SinceYear")]
    pub promo2_since_year: Option<i32>,
    #[serde(rename = "PromoInterval")]
    pub promo_interval: Option<String>,
    #[serde(rename = "Year")]
    pub year: Option<i32>,
    #[serde(rename = "Month")]
    pub month: Option<u32>,
    #[serde(rename = "Week")]
    pub iso_week: Option<u32>,
    #[serde(rename = "CompetitionOpenDuration")]
    pub competition_open_duration: Option<u32>,
    #[serde(rename = "AvgSalesPerStore")]
    pub avg_sales_per_store: Option<f64>,
    #[serde(rename = "MedSalesPerStore")]
    pub med_sales_per_store: Option<f64>,
    #[serde(rename = "AvgCustomersPerStore")]
    pub avg_customers_per_store: Option<f64>,
    #[serde(rename = "MedCustomersPerStore")]
    pub med_customers_per_store: Option<f64>,
    #[serde(rename = "LastDaySalesPerStore")]
    pub last_day_sales: Option<f64>,
    #[serde(rename = "Last2DaysSalesPerStore")]
    pub last_2_days_sales: Option<f64>,
    #[serde(rename = "LastWeekSalesPerStore")]
    pub last_week_sales: Option<f64>,
    #[serde(rename = "LastDayCustomersPerStore")]
    pub last_day_customers: Option<f64>,
    #[serde(rename = "Last2DaysCustomersPerStore")]
    pub last_2_days_customers: Option<f64>,
    #[serde(rename = "LastWeekCustomersPerStore")]
    pub last_week_customers: Option<f64>,
    #[serde(rename = "Store_AvgCustSpent_Trend")]
    pub avg_spend_trend: Option<f64>,
}

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("source table at {path} is unavailable: {source}")]
    SourceUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("table at {path} is missing required column {column}")]
    SchemaMismatch { path: PathBuf, column: String },
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("failed to parse field {field} value '{value}' at line {line}")]
    ParseField {
        field: &'static str,
        value: String,
        line: u64,
    },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reads the raw sales table, coercing text to typed values. `DayOfWeek`,
/// `StateHoliday` and `SchoolHoliday` are optional in the source schema and
/// default to 0 / "0" / 0 when the column is absent.
pub fn load_sales_table(path: &Path) -> Result<Vec<SalesRecord>, DatasetError> {
    let mut reader = open_reader(path)?;
    let header = header_index(&mut reader, path, &SALES_REQUIRED_COLUMNS)?;

    let day_of_week_idx = header.position("DayOfWeek");
    let state_holiday_idx = header.position("StateHoliday");
    let school_holiday_idx = header.position("SchoolHoliday");

    let mut rows = Vec::new();
    for (offset, record) in reader.records().enumerate() {
        let record = record?;
        let line = offset as u64 + 2;
        rows.push(SalesRecord {
            store_id: parse_u32(&record, header.required("Store"), "Store", line)?,
            day_of_week: match day_of_week_idx {
                Some(idx) => parse_u8(&record, idx, "DayOfWeek", line)?,
                None => 0,
            },
            date: field_text(&record, header.required("Date")).to_string(),
            sales: parse_f64(&record, header.required("Sales"), "Sales", line)?,
            customers: parse_u32(&record, header.required("Customers"), "Customers", line)?,
            open: parse_u8(&record, header.required("Open"), "Open", line)?,
            promo: parse_u8(&record, header.required("Promo"), "Promo", line)?,
            state_holiday: match state_holiday_idx {
                Some(idx) => field_text(&record, idx).to_string(),
                None => "0".to_string(),
            },
            school_holiday: match school_holiday_idx {
                Some(idx) => parse_u8(&record, idx, "SchoolHoliday", line)?,
                None => 0,
            },
        });
    }

    info!(
        component = "dataset",
        event = "dataset.sales.loaded",
        path = %path.display(),
        rows = rows.len()
    );
    Ok(rows)
}

/// Reads the raw store-metadata table. Empty and `NA` cells become `None`;
/// the cleaning stage decides what missing means.
pub fn load_store_table(path: &Path) -> Result<Vec<StoreRecord>, DatasetError> {
    let mut reader = open_reader(path)?;
    let header = header_index(&mut reader, path, &STORE_REQUIRED_COLUMNS)?;

    let mut rows = Vec::new();
    for (offset, record) in reader.records().enumerate() {
        let record = record?;
        let line = offset as u64 + 2;
        rows.push(StoreRecord {
            store_id: parse_u32(&record, header.required("Store"), "Store", line)?,
            store_type: field_text(&record, header.required("StoreType")).to_string(),
            assortment: field_text(&record, header.required("Assortment")).to_string(),
            competition_distance: parse_opt_f64(
                &record,
                header.required("CompetitionDistance"),
                "CompetitionDistance",
                line,
            )?,
            competition_open_since_month: parse_opt_u32(
                &record,
                header.required("CompetitionOpenSinceMonth"),
                "CompetitionOpenSinceMonth",
                line,
            )?,
            competition_open_since_year: parse_opt_i32(
                &record,
                header.required("CompetitionOpenSinceYear"),
                "CompetitionOpenSinceYear",
                line,
            )?,
            promo2: parse_u8(&record, header.required("Promo2"), "Promo2", line)?,
            promo2_since_week: parse_opt_u32(
                &record,
                header.required("Promo2SinceWeek"),
                "Promo2SinceWeek",
                line,
            )?,
            promo2_since_year: parse_opt_i32(
                &record,
                header.required("Promo2SinceYear"),
                "Promo2SinceYear",
                line,
            )?,
            promo_interval: match field_text(&record, header.required("PromoInterval")) {
                "" | "NA" => None,
                text => Some(text.to_string()),
            },
        });
    }

    info!(
        component = "dataset",
        event = "dataset.store.loaded",
        path = %path.display(),
        rows = rows.len()
    );
    Ok(rows)
}

/// Writes engineered rows as a delimited file with a header row. The write
/// is atomic: an aborted stage leaves no partial output behind.
pub fn write_feature_rows(path: &Path, rows: &[FeatureRow]) -> Result<(), DatasetError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in rows {
        writer.serialize(row)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|err| DatasetError::Io(err.into_error()))?;
    write_atomic(path, &bytes)?;

    info!(
        component = "dataset",
        event = "dataset.output.written",
        path = %path.display(),
        rows = rows.len()
    );
    Ok(())
}

struct HeaderIndex {
    columns: Vec<String>,
}

impl HeaderIndex {
    fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    /// Presence is checked against the required set up front, so lookups of
    /// required columns cannot miss.
    fn required(&self, name: &str) -> usize {
        self.position(name)
            .unwrap_or_else(|| panic!("required column {name} was validated at header read"))
    }
}

fn open_reader(path: &Path) -> Result<csv::Reader<fs::File>, DatasetError> {
    let file = fs::File::open(path).map_err(|source| DatasetError::SourceUnavailable {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(csv::ReaderBuilder::new().has_headers(true).from_reader(file))
}

fn header_index(
    reader: &mut csv::Reader<fs::File>,
    path: &Path,
    required: &[&str],
) -> Result<HeaderIndex, DatasetError> {
    let headers = reader.headers()?.clone();
    let columns: Vec<String> = headers.iter().map(|column| column.trim().to_string()).collect();
    let index = HeaderIndex { columns };

    for column in required {
        if index.position(column).is_none() {
            return Err(DatasetError::SchemaMismatch {
                path: path.to_path_buf(),
                column: (*column).to_string(),
            });
        }
    }

    Ok(index)
}

fn field_text<'r>(record: &'r StringRecord, idx: usize) -> &'r str {
    record.get(idx).unwrap_or_default().trim()
}

fn parse_f64(
    record: &StringRecord,
    idx: usize,
    field: &'static str,
    line: u64,
) -> Result<f64, DatasetError> {
    let raw = field_text(record, idx);
    raw.parse::<f64>().map_err(|_| DatasetError::ParseField {
        field,
        value: raw.to_string(),
        line,
    })
}

fn parse_u32(
    record: &StringRecord,
    idx: usize,
    field: &'static str,
    line: u64,
) -> Result<u32, DatasetError> {
    let raw = field_text(record, idx);
    parse_integer_like(raw)
        .and_then(|value| u32::try_from(value).ok())
        .ok_or_else(|| DatasetError::ParseField {
            field,
            value: raw.to_string(),
            line,
        })
}

fn parse_u8(
    record: &StringRecord,
    idx: usize,
    field: &'static str,
    line: u64,
) -> Result<u8, DatasetError> {
    let raw = field_text(record, idx);
    parse_integer_like(raw)
        .and_then(|value| u8::try_from(value).ok())
        .ok_or_else(|| DatasetError::ParseField {
            field,
            value: raw.to_string(),
            line,
        })
}

fn parse_opt_f64(
    record: &StringRecord,
    idx: usize,
    field: &'static str,
    line: u64,
) -> Result<Option<f64>, DatasetError> {
    let raw = field_text(record, idx);
    if raw.is_empty() || raw == "NA" {
        return Ok(None);
    }
    parse_f64(record, idx, field, line).map(Some)
}

fn parse_opt_u32(
    record: &StringRecord,
    idx: usize,
    field: &'static str,
    line: u64,
) -> Result<Option<u32>, DatasetError> {
    let raw = field_text(record, idx);
    if raw.is_empty() || raw == "NA" {
        return Ok(None);
    }
    parse_u32(record, idx, field, line).map(Some)
}

fn parse_opt_i32(
    record: &StringRecord,
    idx: usize,
    field: &'static str,
    line: u64,
) -> Result<Option<i32>, DatasetError> {
    let raw = field_text(record, idx);
    if raw.is_empty() || raw == "NA" {
        return Ok(None);
    }
    parse_integer_like(raw)
        .and_then(|value| i32::try_from(value).ok())
        .map(Some)
        .ok_or_else(|| DatasetError::ParseField {
            field,
            value: raw.to_string(),
            line,
        })
}

/// Accepts plain integers and float-shaped integers ("2009.0"), which appear
/// when a table has round-tripped through tooling that widens int columns.
fn parse_integer_like(raw: &str) -> Option<i64> {
    if let Ok(value) = raw.parse::<i64>() {
        return Some(value);
    }
    let value = raw.parse::<f64>().ok()?;
    if value.fract() == 0.0 && value.is_finite() {
        Some(value as i64)
    } else {
        None
    }
}
