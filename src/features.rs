//! Per-store, leakage-safe feature engineering.
//!
//! Everything here is scoped to each store's time-ordered row sequence.
//! The one invariant that matters: a feature attached to row t may depend
//! only on rows of the same store strictly earlier than t. All windowed
//! statistics are therefore shifted by one row, and rows without enough
//! history carry a missing value, never zero.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::dataset::{CompetitionOpen, DatedRow, FeatureRow, Promo2Since};
use crate::transform::sort_by_date_key;

const LAG_OFFSETS: [usize; 3] = [1, 2, 7];

pub const DEFAULT_SPEND_TREND_WINDOW: usize = 30;

/// What to attach when a derived value is undefined (no prior history, or a
/// zero-customer day makes the spend ratio meaningless). `LeaveMissing`
/// hands the gap to the model; `ImputeZero` writes 0 instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MissingPolicy {
    LeaveMissing,
    ImputeZero,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Trailing window length for the average-spend trend.
    pub spend_trend_window: usize,
    pub missing_policy: MissingPolicy,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            spend_trend_window: DEFAULT_SPEND_TREND_WINDOW,
            missing_policy: MissingPolicy::LeaveMissing,
        }
    }
}

/// Derives the full per-store feature family: competition-exposure
/// duration, expanding mean/median of sales and customers, lags 1/2/7,
/// and the rolling average-spend trend. Input rows must already be in
/// canonical date order; the output is re-sorted as a post-condition since
/// grouped work does not preserve global order.
pub fn engineer_features(rows: Vec<DatedRow>, cfg: &FeatureConfig) -> Vec<FeatureRow> {
    let n = rows.len();

    // One "store id -> ordered index list" map, built once and reused by
    // every feature family.
    let mut groups: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
    for (idx, row) in rows.iter().enumerate() {
        groups.entry(row.store_id).or_default().push(idx);
    }

    info!(
        component = "features",
        event = "features.engineer.start",
        rows = n,
        stores = groups.len(),
        spend_trend_window = cfg.spend_trend_window,
        missing_policy = ?cfg.missing_policy
    );

    let mut avg_sales: Vec<Option<f64>> = vec![None; n];
    let mut med_sales: Vec<Option<f64>> = vec![None; n];
    let mut avg_customers: Vec<Option<f64>> = vec![None; n];
    let mut med_customers: Vec<Option<f64>> = vec![None; n];
    let mut lag_sales: [Vec<Option<f64>>; 3] = [vec![None; n], vec![None; n], vec![None; n]];
    let mut lag_customers: [Vec<Option<f64>>; 3] = [vec![None; n], vec![None; n], vec![None; n]];
    let mut spend_trend: Vec<Option<f64>> = vec![None; n];

    for indices in groups.values() {
        expanding_into(
            &rows,
            indices,
            |row| row.sales,
            &mut avg_sales,
            &mut med_sales,
        );
        expanding_into(
            &rows,
            indices,
            |row| f64::from(row.customers),
            &mut avg_customers,
            &mut med_customers,
        );

        for (slot, offset) in LAG_OFFSETS.iter().copied().enumerate() {
            for pos in offset..indices.len() {
                let earlier = &rows[indices[pos - offset]];
                lag_sales[slot][indices[pos]] = Some(earlier.sales);
                lag_customers[slot][indices[pos]] = Some(f64::from(earlier.customers));
            }
        }

        let mut window: VecDeque<Option<f64>> = VecDeque::new();
        for &idx in indices {
            spend_trend[idx] = mean_of_defined(&window);

            let row = &rows[idx];
            let ratio = if row.customers == 0 {
                None
            } else {
                Some(row.sales / f64::from(row.customers))
            };
            window.push_back(ratio);
            while window.len() > cfg.spend_trend_window {
                window.pop_front();
            }
        }
    }

    let resolve = |value: Option<f64>| match cfg.missing_policy {
        MissingPolicy::LeaveMissing => value,
        MissingPolicy::ImputeZero => Some(value.unwrap_or(0.0)),
    };

    let mut out: Vec<FeatureRow> = rows
        .into_iter()
        .enumerate()
        .map(|(idx, row)| {
            let competition_open_duration = competition_duration(&row);

            let (
                store_type,
                assortment,
                competition_distance,
                promo2,
                promo2_since_week,
                promo2_since_year,
                promo_interval,
            ) = match &row.store {
                Some(profile) => {
                    let (week, year) = match profile.promo2_since {
                        Promo2Since::Since { year, week } => (week, year),
                        Promo2Since::NotRecorded => (0, 0),
                    };
                    (
                        Some(profile.store_type.clone()),
                        Some(profile.assortment.clone()),
                        profile.competition_distance,
                        Some(profile.promo2),
                        Some(week),
                        Some(year),
                        Some(
                            profile
                                .promo_interval
                                .clone()
                                .unwrap_or_else(|| "0".to_string()),
                        ),
                    )
                }
                None => (None, None, None, None, None, None, None),
            };

            FeatureRow {
                store_id: row.store_id,
                day_of_week: row.day_of_week,
                date: row.date,
                sales: row.sales,
                customers: f64::from(row.customers),
                promo: row.promo,
                state_holiday: row.state_holiday,
                school_holiday: row.school_holiday,
                store_type,
                assortment,
                competition_distance,
                promo2,
                promo2_since_week,
                promo2_since_year,
                promo_interval,
                year: row.year,
                month: row.month,
                iso_week: row.iso_week,
                competition_open_duration,
                avg_sales_per_store: resolve(avg_sales[idx]),
                med_sales_per_store: resolve(med_sales[idx]),
                avg_customers_per_store: resolve(avg_customers[idx]),
                med_customers_per_store: resolve(med_customers[idx]),
                last_day_sales: resolve(lag_sales[0][idx]),
                last_2_days_sales: resolve(lag_sales[1][idx]),
                last_week_sales: resolve(lag_sales[2][idx]),
                last_day_customers: resolve(lag_customers[0][idx]),
                last_2_days_customers: resolve(lag_customers[1][idx]),
                last_week_customers: resolve(lag_customers[2][idx]),
                avg_spend_trend: resolve(spend_trend[idx]),
            }
        })
        .collect();

    sort_by_date_key(&mut out, |row| row.date);

    info!(
        component = "features",
        event = "features.engineer.finish",
        rows = out.len()
    );

    out
}

/// Whole months between the recorded competition opening and the row's own
/// month, clamped at 0: a row dated before the opening counts as "not yet
/// exposed". A `NotRecorded` opening yields 0 as well: "no active
/// competition" is intentionally coded the same as "just opened", a known
/// modeling simplification. A recorded opening on a row without a parseable
/// date yields a missing value.
fn competition_duration(row: &DatedRow) -> Option<u32> {
    match row.store.as_ref().map(|profile| profile.competition_open) {
        Some(CompetitionOpen::Since { year, month }) => match (row.year, row.month) {
            (Some(row_year), Some(row_month)) => {
                let months =
                    i64::from(row_year - year) * 12 + i64::from(row_month) - i64::from(month);
                Some(months.max(0) as u32)
            }
            _ => None,
        },
        _ => Some(0),
    }
}

/// Running mean and median over all prior same-store rows, shifted by one:
/// the value stored at a row summarizes rows strictly before it, so each
/// store's first row stays missing. The median keeps an insertion-sorted
/// buffer of everything seen so far.
fn expanding_into(
    rows: &[DatedRow],
    indices: &[usize],
    value_of: impl Fn(&DatedRow) -> f64,
    means: &mut [Option<f64>],
    medians: &mut [Option<f64>],
) {
    let mut sum = 0.0;
    let mut sorted: Vec<f64> = Vec::with_capacity(indices.len());

    for (pos, &idx) in indices.iter().enumerate() {
        if pos > 0 {
            means[idx] = Some(sum / pos as f64);
            medians[idx] = Some(median_of_sorted(&sorted));
        }

        let value = value_of(&rows[idx]);
        sum += value;
        let insert_at = sorted.partition_point(|&existing| existing < value);
        sorted.insert(insert_at, value);
    }
}

fn median_of_sorted(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

fn mean_of_defined(window: &VecDeque<Option<f64>>) -> Option<f64> {
    let mut sum = 0.0;
    let mut count = 0usize;
    for ratio in window.iter().flatten() {
        sum += ratio;
        count += 1;
    }
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}
