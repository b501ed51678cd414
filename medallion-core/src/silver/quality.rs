//! Data-quality assessment.
//!
//! The same assessment runs on raw input and on cleaned, enriched output so
//! callers can compare the two reports.

use crate::config::SilverConfig;
use crate::frame::{Frame, CLOSE, HIGH, LOW, OHLCV_COLUMNS, OPEN};
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// Which side of cleaning a report describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityStage {
    Raw,
    Cleaned,
}

impl QualityStage {
    pub fn as_str(self) -> &'static str {
        match self {
            QualityStage::Raw => "raw",
            QualityStage::Cleaned => "cleaned",
        }
    }

    pub(crate) fn parse(s: &str) -> Option<Self> {
        match s {
            "raw" => Some(QualityStage::Raw),
            "cleaned" => Some(QualityStage::Cleaned),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OhlcViolationKind {
    HighBelowLow,
    HighBelowOpen,
    HighBelowClose,
    LowAboveOpen,
    LowAboveClose,
}

impl fmt::Display for OhlcViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OhlcViolationKind::HighBelowLow => "high < low",
            OhlcViolationKind::HighBelowOpen => "high < open",
            OhlcViolationKind::HighBelowClose => "high < close",
            OhlcViolationKind::LowAboveOpen => "low > open",
            OhlcViolationKind::LowAboveClose => "low > close",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OhlcViolation {
    pub date: NaiveDate,
    pub kind: OhlcViolationKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataQualityReport {
    pub symbol: String,
    pub batch_id: String,
    pub stage: QualityStage,
    pub total_rows: usize,
    /// Rows with no null cell.
    pub valid_rows: usize,
    /// Non-null cells as a percentage of all cells.
    pub completeness_pct: f64,
    pub null_counts: BTreeMap<String, usize>,
    pub outlier_counts: BTreeMap<String, usize>,
    pub duplicate_timestamps: usize,
    /// Weekdays between the first and last date with no row.
    pub missing_days: Vec<NaiveDate>,
    pub ohlc_violations: Vec<OhlcViolation>,
    pub passed: bool,
    pub issues: Vec<String>,
    pub assessed_at: DateTime<Utc>,
}

impl DataQualityReport {
    /// Completeness as a 0-1 score.
    pub fn quality_score(&self) -> f64 {
        self.completeness_pct / 100.0
    }

    pub fn null_fraction(&self) -> f64 {
        1.0 - self.quality_score()
    }
}

/// Assess `rows` without modifying or persisting anything.
pub fn assess(
    symbol: &str,
    batch_id: &str,
    rows: &Frame,
    stage: QualityStage,
    config: &SilverConfig,
) -> DataQualityReport {
    let total_rows = rows.len();
    let total_cells = total_rows * rows.columns().len();
    let null_cells = rows.null_cells();
    let completeness_pct = if total_cells == 0 {
        0.0
    } else {
        100.0 * (total_cells - null_cells) as f64 / total_cells as f64
    };

    let valid_rows = (0..total_rows)
        .filter(|&i| rows.columns().iter().all(|c| c.values()[i].is_some()))
        .count();

    let null_counts: BTreeMap<String, usize> = rows
        .columns()
        .iter()
        .map(|c| (c.name().to_string(), c.null_count()))
        .collect();

    let outlier_counts: BTreeMap<String, usize> = OHLCV_COLUMNS
        .iter()
        .filter_map(|name| {
            let values = rows.column(name)?;
            Some((name.to_string(), iqr_outliers(values, config.iqr_multiplier)))
        })
        .collect();

    let duplicate_timestamps = rows.duplicate_dates();
    let missing_days = missing_business_days(rows.dates());
    let ohlc_violations = ohlc_violations(rows);

    let mut issues = Vec::new();
    for (column, &count) in &null_counts {
        if count > 0 {
            issues.push(format!("{count} null value(s) in '{column}'"));
        }
    }
    let null_fraction = if total_cells == 0 {
        1.0
    } else {
        null_cells as f64 / total_cells as f64
    };
    let too_sparse = null_fraction >= config.max_null_fraction;
    if too_sparse {
        issues.push(format!(
            "null fraction {:.2}% is at or above the {:.2}% limit",
            null_fraction * 100.0,
            config.max_null_fraction * 100.0
        ));
    }
    if duplicate_timestamps > 0 {
        issues.push(format!("{duplicate_timestamps} duplicate timestamp(s)"));
    }
    if !ohlc_violations.is_empty() {
        let first = &ohlc_violations[0];
        issues.push(format!(
            "{} OHLC consistency violation(s), first on {} ({})",
            ohlc_violations.len(),
            first.date,
            first.kind
        ));
    }
    for (column, &count) in &outlier_counts {
        if count > 0 {
            issues.push(format!("{count} IQR outlier(s) in '{column}'"));
        }
    }
    if !missing_days.is_empty() {
        issues.push(format!("{} missing business day(s)", missing_days.len()));
    }

    DataQualityReport {
        symbol: symbol.to_string(),
        batch_id: batch_id.to_string(),
        stage,
        total_rows,
        valid_rows,
        completeness_pct,
        null_counts,
        outlier_counts,
        duplicate_timestamps,
        missing_days,
        passed: !too_sparse && duplicate_timestamps == 0 && ohlc_violations.is_empty(),
        ohlc_violations,
        issues,
        assessed_at: Utc::now(),
    }
}

/// Linear-interpolated percentile of sorted, non-empty data (`q` in 0..=1).
fn percentile(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

fn iqr_outliers(values: &[Option<f64>], multiplier: f64) -> usize {
    let mut present: Vec<f64> = values.iter().flatten().copied().collect();
    if present.len() < 4 {
        return 0;
    }
    present.sort_by(f64::total_cmp);
    let q1 = percentile(&present, 0.25);
    let q3 = percentile(&present, 0.75);
    let iqr = q3 - q1;
    let (lower, upper) = (q1 - multiplier * iqr, q3 + multiplier * iqr);
    present.iter().filter(|&&v| v < lower || v > upper).count()
}

fn is_weekday(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

fn missing_business_days(dates: &[NaiveDate]) -> Vec<NaiveDate> {
    let (Some(&first), Some(&last)) = (dates.iter().min(), dates.iter().max()) else {
        return Vec::new();
    };
    let present: HashSet<NaiveDate> = dates.iter().copied().collect();
    let mut missing = Vec::new();
    let mut day = first;
    while day <= last {
        if is_weekday(day) && !present.contains(&day) {
            missing.push(day);
        }
        day += Duration::days(1);
    }
    missing
}

fn ohlc_violations(rows: &Frame) -> Vec<OhlcViolation> {
    let (Some(open), Some(high), Some(low), Some(close)) = (
        rows.column(OPEN),
        rows.column(HIGH),
        rows.column(LOW),
        rows.column(CLOSE),
    ) else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for (i, &date) in rows.dates().iter().enumerate() {
        let (Some(o), Some(h), Some(l), Some(c)) = (open[i], high[i], low[i], close[i]) else {
            continue;
        };
        let checks = [
            (h < l, OhlcViolationKind::HighBelowLow),
            (h < o, OhlcViolationKind::HighBelowOpen),
            (h < c, OhlcViolationKind::HighBelowClose),
            (l > o, OhlcViolationKind::LowAboveOpen),
            (l > c, OhlcViolationKind::LowAboveClose),
        ];
        out.extend(
            checks
                .into_iter()
                .filter(|(violated, _)| *violated)
                .map(|(_, kind)| OhlcViolation { date, kind }),
        );
    }
    out
}
