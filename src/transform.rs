//! Dataset repair, joining, calendar features, scale compression and the
//! temporal split.
//!
//! Every function here is a pure transformation: it consumes a dataset
//! value and returns a new one, alongside a report of what it did. The
//! ascending-by-date ordering established by `add_calendar_features` is a
//! precondition for all windowed computations downstream; any stage that
//! may reorder rows re-establishes it before returning.

use std::collections::{BTreeMap, HashMap};

use chrono::{Datelike, NaiveDate};
use thiserror::Error;
use tracing::{info, warn};

use crate::dataset::{
    CompetitionOpen, DatedRow, FeatureRow, MergedRow, Promo2Since, SalesRecord, StoreProfile,
    StoreRecord,
};

const OUTLIER_QUANTILE: f64 = 0.999;
const DATE_FORMAT: &str = "%Y-%m-%d";

pub const DEFAULT_SKEWED_COLUMNS: [&str; 3] = ["Sales", "Customers", "CompetitionDistance"];

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("store metadata is not unique: store {store_id} appears {occurrences} times")]
    JoinCardinalityViolation { store_id: u32, occurrences: usize },
    #[error("test fraction must be strictly between 0 and 1, got {0}")]
    InvalidTestFraction(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SalesCleanReport {
    pub rows_in: usize,
    pub zero_rows_removed: usize,
    pub outlier_rows_removed: usize,
    pub sales_cap: Option<f64>,
    pub customers_cap: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoreCleanReport {
    pub rows: usize,
    pub competition_distance_imputed: usize,
    pub competition_distance_median: Option<f64>,
}

/// Removes degenerate sales rows, then trims upper-tail outliers.
///
/// Zero-removal happens first: the 99.9th-percentile caps for sales and
/// customers are computed over the already-zero-filtered population, so
/// closed-store rows cannot distort the tail estimate. Running this on an
/// already-clean dataset removes nothing.
pub fn clean_sales(rows: Vec<SalesRecord>) -> (Vec<SalesRecord>, SalesCleanReport) {
    let rows_in = rows.len();
    let nonzero: Vec<SalesRecord> = rows.into_iter().filter(|row| row.sales > 0.0).collect();
    let zero_rows_removed = rows_in - nonzero.len();

    let sales_cap = quantile(nonzero.iter().map(|row| row.sales), OUTLIER_QUANTILE);
    let customers_cap = quantile(
        nonzero.iter().map(|row| f64::from(row.customers)),
        OUTLIER_QUANTILE,
    );

    let before_trim = nonzero.len();
    let kept: Vec<SalesRecord> = nonzero
        .into_iter()
        .filter(|row| {
            let within_sales = sales_cap.map(|cap| row.sales <= cap).unwrap_or(true);
            let within_customers = customers_cap
                .map(|cap| f64::from(row.customers) <= cap)
                .unwrap_or(true);
            within_sales && within_customers
        })
        .collect();
    let outlier_rows_removed = before_trim - kept.len();

    let report = SalesCleanReport {
        rows_in,
        zero_rows_removed,
        outlier_rows_removed,
        sales_cap,
        customers_cap,
    };

    info!(
        component = "transform",
        event = "transform.clean_sales.finish",
        rows_in = report.rows_in,
        rows_out = kept.len(),
        zero_rows_removed = report.zero_rows_removed,
        outlier_rows_removed = report.outlier_rows_removed,
        sales_cap = ?report.sales_cap,
        customers_cap = ?report.customers_cap
    );

    (kept, report)
}

/// Repairs store metadata: imputes missing competition distance with the
/// column median and converts the 0/missing sentinels of the competition
/// and promo2 fields into explicit variants. Sees no sales rows.
pub fn clean_stores(rows: Vec<StoreRecord>) -> (Vec<StoreProfile>, StoreCleanReport) {
    let distance_median = median(rows.iter().filter_map(|row| row.competition_distance));
    let mut imputed = 0usize;

    let profiles: Vec<StoreProfile> = rows
        .into_iter()
        .map(|row| {
            let competition_distance = match row.competition_distance {
                Some(value) => Some(value),
                None => {
                    if distance_median.is_some() {
                        imputed += 1;
                    }
                    distance_median
                }
            };

            let competition_open = match (
                row.competition_open_since_year,
                row.competition_open_since_month,
            ) {
                (Some(year), Some(month)) if year != 0 && month != 0 => {
                    CompetitionOpen::Since { year, month }
                }
                _ => CompetitionOpen::NotRecorded,
            };

            let promo2_since = match (row.promo2_since_year, row.promo2_since_week) {
                (Some(year), Some(week)) if year != 0 && week != 0 => {
                    Promo2Since::Since { year, week }
                }
                _ => Promo2Since::NotRecorded,
            };

            StoreProfile {
                store_id: row.store_id,
                store_type: row.store_type,
                assortment: row.assortment,
                competition_distance,
                competition_open,
                promo2: row.promo2,
                promo2_since,
                promo_interval: row.promo_interval,
            }
        })
        .collect();

    let report = StoreCleanReport {
        rows: profiles.len(),
        competition_distance_imputed: imputed,
        competition_distance_median: distance_median,
    };

    info!(
        component = "transform",
        event = "transform.clean_stores.finish",
        rows = report.rows,
        competition_distance_imputed = report.competition_distance_imputed,
        competition_distance_median = ?report.competition_distance_median
    );

    (profiles, report)
}

/// Left-joins sales rows onto store profiles by store id. Sales is the
/// driving table: every sales row survives, unmatched ones without store
/// attributes; store profiles with no sales rows are dropped.
pub fn merge_sales_with_stores(
    sales: Vec<SalesRecord>,
    stores: Vec<StoreProfile>,
) -> Result<Vec<MergedRow>, TransformError> {
    let mut counts: BTreeMap<u32, usize> = BTreeMap::new();
    for store in &stores {
        *counts.entry(store.store_id).or_insert(0) += 1;
    }
    if let Some((&store_id, &occurrences)) = counts.iter().find(|(_, &count)| count > 1) {
        return Err(TransformError::JoinCardinalityViolation {
            store_id,
            occurrences,
        });
    }

    let by_id: HashMap<u32, StoreProfile> = stores
        .into_iter()
        .map(|store| (store.store_id, store))
        .collect();

    let mut unmatched = 0usize;
    let merged: Vec<MergedRow> = sales
        .into_iter()
        .map(|row| {
            let store = by_id.get(&row.store_id).cloned();
            if store.is_none() {
                unmatched += 1;
            }
            MergedRow {
                store_id: row.store_id,
                day_of_week: row.day_of_week,
                date: row.date,
                sales: row.sales,
                customers: row.customers,
                open: row.open,
                promo: row.promo,
                state_holiday: row.state_holiday,
                school_holiday: row.school_holiday,
                store,
            }
        })
        .collect();

    info!(
        component = "transform",
        event = "transform.merge.finish",
        rows = merged.len(),
        unmatched_sales_rows = unmatched
    );

    Ok(merged)
}

/// Parses the raw date text, derives calendar year, month and ISO-8601 week,
/// and establishes the canonical ascending-by-date ordering. Rows whose date
/// fails to parse are kept with no calendar fields and sort last.
pub fn add_calendar_features(rows: Vec<MergedRow>) -> Vec<DatedRow> {
    let mut unparsed = 0usize;
    let mut dated: Vec<DatedRow> = rows
        .into_iter()
        .map(|row| {
            let date = NaiveDate::parse_from_str(row.date.trim(), DATE_FORMAT).ok();
            if date.is_none() {
                unparsed += 1;
            }
            DatedRow {
                store_id: row.store_id,
                day_of_week: row.day_of_week,
                date,
                sales: row.sales,
                customers: row.customers,
                open: row.open,
                promo: row.promo,
                state_holiday: row.state_holiday,
                school_holiday: row.school_holiday,
                year: date.map(|d| d.year()),
                month: date.map(|d| d.month()),
                iso_week: date.map(|d| d.iso_week().week()),
                store: row.store,
            }
        })
        .collect();

    sort_by_date_key(&mut dated, |row| row.date);

    if unparsed > 0 {
        warn!(
            component = "transform",
            event = "transform.calendar.unparsed_dates",
            unparsed_rows = unparsed
        );
    }
    info!(
        component = "transform",
        event = "transform.calendar.finish",
        rows = dated.len(),
        unparsed_rows = unparsed
    );

    dated
}

/// Applies log(1+x) to the configured heavy-tailed columns. Column names
/// that do not exist in the engineered schema are silently skipped, as are
/// cells with no value.
pub fn compress_skewed_columns(mut rows: Vec<FeatureRow>, columns: &[String]) -> Vec<FeatureRow> {
    let mut applied: Vec<&str> = Vec::new();
    for column in columns {
        match column.as_str() {
            "Sales" => {
                for row in &mut rows {
                    row.sales = row.sales.ln_1p();
                }
                applied.push("Sales");
            }
            "Customers" => {
                for row in &mut rows {
                    row.customers = row.customers.ln_1p();
                }
                applied.push("Customers");
            }
            "CompetitionDistance" => {
                for row in &mut rows {
                    row.competition_distance = row.competition_distance.map(f64::ln_1p);
                }
                applied.push("CompetitionDistance");
            }
            _ => {}
        }
    }

    info!(
        component = "transform",
        event = "transform.compress.finish",
        rows = rows.len(),
        columns = ?applied
    );

    rows
}

/// Splits the chronologically sorted dataset into a training prefix and a
/// test suffix: split index = floor(N x (1 - f)). No training row is later
/// than any test row, which is the point of a temporal split.
pub fn split_by_time(
    mut rows: Vec<FeatureRow>,
    test_fraction: f64,
) -> Result<(Vec<FeatureRow>, Vec<FeatureRow>), TransformError> {
    if !(test_fraction > 0.0 && test_fraction < 1.0) {
        return Err(TransformError::InvalidTestFraction(test_fraction));
    }

    sort_by_date_key(&mut rows, |row| row.date);

    let split_index = (rows.len() as f64 * (1.0 - test_fraction)).floor() as usize;
    let test = rows.split_off(split_index);
    let train = rows;

    info!(
        component = "transform",
        event = "transform.split.finish",
        train_rows = train.len(),
        test_rows = test.len(),
        test_fraction = test_fraction
    );

    Ok((train, test))
}

/// Stable ascending-by-date sort with null dates placed last.
pub(crate) fn sort_by_date_key<T>(rows: &mut [T], date_of: impl Fn(&T) -> Option<NaiveDate>) {
    rows.sort_by_key(|row| {
        let date = date_of(row);
        (date.is_none(), date)
    });
}

/// Quantile with linear interpolation between order statistics.
pub(crate) fn quantile(values: impl Iterator<Item = f64>, q: f64) -> Option<f64> {
    let mut sorted: Vec<f64> = values.collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(f64::total_cmp);

    let h = (sorted.len() - 1) as f64 * q;
    let lo = h.floor() as usize;
    let hi = (lo + 1).min(sorted.len() - 1);
    let frac = h - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

pub(crate) fn median(values: impl Iterator<Item = f64>) -> Option<f64> {
    quantile(values, 0.5)
}
