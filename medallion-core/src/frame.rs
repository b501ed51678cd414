//! In-memory row set shared by every layer.
//!
//! A `Frame` is a daily date index plus an ordered list of named, nullable
//! `f64` columns. Nulls are `None`; they only become `NaN` at the indicator
//! boundary. Every present value is finite: `NaN` and `inf` enter as nulls.
//! Frames convert to and from polars `DataFrame`s for parquet I/O, and hash
//! to a BLAKE3 content checksum that is stable across that round trip.

use crate::error::{Error, Result, SchemaError};
use chrono::NaiveDate;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const DATE_COLUMN: &str = "date";
pub const OPEN: &str = "open";
pub const HIGH: &str = "high";
pub const LOW: &str = "low";
pub const CLOSE: &str = "close";
pub const VOLUME: &str = "volume";

/// Columns every raw batch must carry.
pub const OHLCV_COLUMNS: [&str; 5] = [OPEN, HIGH, LOW, CLOSE, VOLUME];

/// Price columns subject to OHLC consistency checks and outlier clipping.
pub const PRICE_COLUMNS: [&str; 4] = [OPEN, HIGH, LOW, CLOSE];

/// One daily OHLCV bar as handed over by a market-data source.
///
/// Non-finite fields are treated as nulls when the bar enters a `Frame`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameColumn {
    name: String,
    values: Vec<Option<f64>>,
}

impl FrameColumn {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn values(&self) -> &[Option<f64>] {
        &self.values
    }

    pub fn null_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_none()).count()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    dates: Vec<NaiveDate>,
    columns: Vec<FrameColumn>,
}

impl Frame {
    pub fn new(dates: Vec<NaiveDate>) -> Self {
        Self {
            dates,
            columns: Vec::new(),
        }
    }

    /// Build a frame from bars, mapping non-finite fields to nulls.
    pub fn from_bars(bars: &[Bar]) -> Self {
        let mut frame = Self::new(bars.iter().map(|b| b.date).collect());
        let cols: [(&str, Vec<Option<f64>>); 5] = [
            (OPEN, bars.iter().map(|b| finite(b.open)).collect()),
            (HIGH, bars.iter().map(|b| finite(b.high)).collect()),
            (LOW, bars.iter().map(|b| finite(b.low)).collect()),
            (CLOSE, bars.iter().map(|b| finite(b.close)).collect()),
            (VOLUME, bars.iter().map(|b| finite(b.volume)).collect()),
        ];
        for (name, values) in cols {
            frame.columns.push(FrameColumn {
                name: name.to_string(),
                values,
            });
        }
        frame
    }

    /// Builder-style column insertion. Fails on length mismatch or duplicate name.
    pub fn with_column(
        mut self,
        name: impl Into<String>,
        values: Vec<Option<f64>>,
    ) -> std::result::Result<Self, SchemaError> {
        let name = name.into();
        if self.has_column(&name) {
            return Err(SchemaError::DuplicateColumn(name));
        }
        self.set_column(name, values)?;
        Ok(self)
    }

    /// Replace the named column, or append it if absent. Non-finite values
    /// are stored as nulls.
    pub fn set_column(
        &mut self,
        name: impl Into<String>,
        values: Vec<Option<f64>>,
    ) -> std::result::Result<(), SchemaError> {
        let name = name.into();
        if values.len() != self.dates.len() {
            return Err(SchemaError::LengthMismatch {
                column: name,
                expected: self.dates.len(),
                actual: values.len(),
            });
        }
        let values: Vec<Option<f64>> = values.into_iter().map(|v| v.and_then(finite)).collect();
        match self.columns.iter_mut().find(|c| c.name == name) {
            Some(existing) => existing.values = values,
            None => self.columns.push(FrameColumn { name, values }),
        }
        Ok(())
    }

    /// Replace or append a dense column; non-finite values become nulls.
    pub fn set_series(
        &mut self,
        name: impl Into<String>,
        values: &[f64],
    ) -> std::result::Result<(), SchemaError> {
        self.set_column(name, values.iter().map(|&v| Some(v)).collect())
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.dates.first().copied()
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.dates.last().copied()
    }

    pub fn columns(&self) -> &[FrameColumn] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> Option<&[Option<f64>]> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.values.as_slice())
    }

    /// Dense copy of a column with nulls as `NaN`, for indicator math.
    pub fn series(&self, name: &str) -> Option<Vec<f64>> {
        self.column(name)
            .map(|values| values.iter().map(|v| v.unwrap_or(f64::NAN)).collect())
    }

    /// Total null cells across all columns.
    pub fn null_cells(&self) -> usize {
        self.columns.iter().map(FrameColumn::null_count).sum()
    }

    /// Rebuild the frame from a list of row indices, in the given order.
    pub fn take_rows(&self, indices: &[usize]) -> Frame {
        Frame {
            dates: indices.iter().map(|&i| self.dates[i]).collect(),
            columns: self
                .columns
                .iter()
                .map(|c| FrameColumn {
                    name: c.name.clone(),
                    values: indices.iter().map(|&i| c.values[i]).collect(),
                })
                .collect(),
        }
    }

    /// Rows `[start, end)`, clamped to the frame.
    pub fn slice(&self, start: usize, end: usize) -> Frame {
        let end = end.min(self.len());
        let start = start.min(end);
        let indices: Vec<usize> = (start..end).collect();
        self.take_rows(&indices)
    }

    /// The last `n` rows (all rows if `n >= len`).
    pub fn tail(&self, n: usize) -> Frame {
        self.slice(self.len().saturating_sub(n), self.len())
    }

    /// Keep rows with `start <= date <= end`; `None` bounds are open.
    pub fn filter_dates(&self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Frame {
        let indices: Vec<usize> = self
            .dates
            .iter()
            .enumerate()
            .filter(|(_, d)| start.map_or(true, |s| **d >= s) && end.map_or(true, |e| **d <= e))
            .map(|(i, _)| i)
            .collect();
        self.take_rows(&indices)
    }

    /// Stack frames vertically. The result carries the union of columns in
    /// first-seen order; a frame lacking a column contributes nulls.
    pub fn concat(frames: &[Frame]) -> Frame {
        let mut names: Vec<String> = Vec::new();
        for frame in frames {
            for col in &frame.columns {
                if !names.contains(&col.name) {
                    names.push(col.name.clone());
                }
            }
        }

        let mut out = Frame::new(frames.iter().flat_map(|f| f.dates.iter().copied()).collect());
        for name in names {
            let mut values = Vec::with_capacity(out.len());
            for frame in frames {
                match frame.column(&name) {
                    Some(col) => values.extend_from_slice(col),
                    None => values.extend(std::iter::repeat(None).take(frame.len())),
                }
            }
            out.columns.push(FrameColumn { name, values });
        }
        out
    }

    /// Drop repeated dates keeping the last occurrence, then sort ascending.
    ///
    /// "Last" is positional, so callers that concatenate batches in ingestion
    /// order get last-write-wins semantics.
    pub fn dedup_keep_last_sorted(&self) -> Frame {
        let mut last_index: HashMap<NaiveDate, usize> = HashMap::new();
        for (i, d) in self.dates.iter().enumerate() {
            last_index.insert(*d, i);
        }
        let mut keep: Vec<usize> = last_index.into_values().collect();
        keep.sort_by_key(|&i| (self.dates[i], i));
        self.take_rows(&keep)
    }

    /// Number of rows whose date already appeared earlier in the index.
    pub fn duplicate_dates(&self) -> usize {
        let mut seen = std::collections::HashSet::with_capacity(self.len());
        self.dates.iter().filter(|d| !seen.insert(**d)).count()
    }

    /// Check the raw-batch contract: OHLCV columns present, at least one row,
    /// dates non-decreasing. Duplicate dates are allowed here; the Silver
    /// quality check reports them.
    pub fn validate_ohlcv(&self) -> std::result::Result<(), SchemaError> {
        for required in OHLCV_COLUMNS {
            if !self.has_column(required) {
                return Err(SchemaError::MissingColumn(required.to_string()));
            }
        }
        if self.is_empty() {
            return Err(SchemaError::Empty);
        }
        for (row, pair) in self.dates.windows(2).enumerate() {
            if pair[1] < pair[0] {
                return Err(SchemaError::NotTimeOrdered {
                    row: row + 1,
                    previous: pair[0],
                    next: pair[1],
                });
            }
        }
        Ok(())
    }

    /// BLAKE3 checksum over the canonical encoding of dates, column names and
    /// cell values. Nulls and values are tagged so `None` never collides with a
    /// number, and values are hashed bit-exactly.
    pub fn content_hash(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&(self.dates.len() as u64).to_le_bytes());
        for date in &self.dates {
            hasher.update(&days_since_epoch(*date).to_le_bytes());
        }
        for col in &self.columns {
            hasher.update(&(col.name.len() as u64).to_le_bytes());
            hasher.update(col.name.as_bytes());
            for value in &col.values {
                match value {
                    Some(v) => {
                        hasher.update(&[1]);
                        hasher.update(&v.to_bits().to_le_bytes());
                    }
                    None => {
                        hasher.update(&[0]);
                    }
                }
            }
        }
        hasher.finalize().to_hex().to_string()
    }

    /// Convert to a polars `DataFrame` with a `date` column first.
    pub fn to_dataframe(&self) -> Result<DataFrame> {
        let days: Vec<i32> = self.dates.iter().map(|d| days_since_epoch(*d)).collect();
        let mut columns = Vec::with_capacity(self.columns.len() + 1);
        columns.push(
            Column::new(DATE_COLUMN.into(), days)
                .cast(&DataType::Date)
                .map_err(|e| Error::Parquet(format!("date cast: {e}")))?,
        );
        for col in &self.columns {
            columns.push(Column::new(col.name.as_str().into(), col.values.clone()));
        }
        DataFrame::new(columns).map_err(|e| Error::Parquet(format!("dataframe creation: {e}")))
    }

    /// Convert back from a `DataFrame` written by [`Frame::to_dataframe`].
    pub fn from_dataframe(df: &DataFrame) -> Result<Frame> {
        let date_col = df
            .column(DATE_COLUMN)
            .map_err(|_| SchemaError::MissingColumn(DATE_COLUMN.to_string()))?;
        let date_ca = date_col
            .date()
            .map_err(|e| Error::Parquet(format!("date column type: {e}")))?;

        let epoch = NaiveDate::default();
        let mut dates = Vec::with_capacity(df.height());
        for i in 0..df.height() {
            let days = date_ca
                .get(i)
                .ok_or_else(|| Error::Parquet(format!("null date at row {i}")))?;
            dates.push(epoch + chrono::Duration::days(days as i64));
        }

        let mut frame = Frame::new(dates);
        for column in df.get_columns() {
            let name = column.name().to_string();
            if name == DATE_COLUMN {
                continue;
            }
            let casted = column
                .cast(&DataType::Float64)
                .map_err(|e| Error::Parquet(format!("column '{name}' cast: {e}")))?;
            let ca = casted
                .f64()
                .map_err(|e| Error::Parquet(format!("column '{name}' type: {e}")))?;
            let values: Vec<Option<f64>> = ca.into_iter().collect();
            frame.set_column(name, values)?;
        }
        Ok(frame)
    }
}

/// Days since 1970-01-01, the physical representation of a polars `Date`.
pub(crate) fn days_since_epoch(date: NaiveDate) -> i32 {
    // NaiveDate::default() is the Unix epoch
    (date - NaiveDate::default()).num_days() as i32
}


fn finite(v: f64) -> Option<f64> {
    v.is_finite().then_some(v)
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn from_bars_maps_nan_to_null() {
        let mut bars = sample_bars(3);
        bars[1].close = f64::NAN;
        let frame = Frame::from_bars(&bars);
        assert_eq!(frame.column(CLOSE).unwrap()[1], None);
        assert_eq!(frame.null_cells(), 1);
    }

    #[test]
    fn infinite_cells_enter_as_nulls() {
        let mut bars = sample_bars(4);
        bars[1].high = f64::INFINITY;
        bars[2].low = f64::NEG_INFINITY;
        let mut frame = Frame::from_bars(&bars);
        assert_eq!(frame.column(HIGH).unwrap()[1], None);
        assert_eq!(frame.column(LOW).unwrap()[2], None);

        frame
            .set_column("x", vec![Some(1.0), Some(f64::INFINITY), None, Some(f64::NAN)])
            .unwrap();
        assert_eq!(frame.column("x").unwrap(), &[Some(1.0), None, None, None]);
        assert_eq!(frame.null_cells(), 5);
    }

    #[test]
    fn set_column_rejects_length_mismatch() {
        let mut frame = sample_frame(3);
        let err = frame.set_column("x", vec![Some(1.0)]).unwrap_err();
        assert!(matches!(err, SchemaError::LengthMismatch { expected: 3, actual: 1, .. }));
    }

    #[test]
    fn validate_rejects_missing_column_and_disorder() {
        let frame = Frame::new(vec![d(2024, 1, 2)])
            .with_column(OPEN, vec![Some(1.0)])
            .unwrap();
        assert_eq!(
            frame.validate_ohlcv().unwrap_err(),
            SchemaError::MissingColumn(HIGH.into())
        );

        let bars = sample_bars(3);
        let reversed: Vec<Bar> = bars.into_iter().rev().collect();
        let err = Frame::from_bars(&reversed).validate_ohlcv().unwrap_err();
        assert!(matches!(err, SchemaError::NotTimeOrdered { row: 1, .. }));
    }

    #[test]
    fn validate_rejects_empty() {
        assert_eq!(Frame::from_bars(&[]).validate_ohlcv().unwrap_err(), SchemaError::Empty);
    }

    #[test]
    fn dedup_keeps_last_occurrence() {
        let frame = Frame::new(vec![d(2024, 1, 3), d(2024, 1, 2), d(2024, 1, 3)])
            .with_column(CLOSE, vec![Some(1.0), Some(2.0), Some(3.0)])
            .unwrap();
        assert_eq!(frame.duplicate_dates(), 1);
        let deduped = frame.dedup_keep_last_sorted();
        assert_eq!(deduped.dates(), &[d(2024, 1, 2), d(2024, 1, 3)]);
        assert_eq!(deduped.column(CLOSE).unwrap(), &[Some(2.0), Some(3.0)]);
    }

    #[test]
    fn concat_unions_columns() {
        let a = Frame::new(vec![d(2024, 1, 2)])
            .with_column("a", vec![Some(1.0)])
            .unwrap();
        let b = Frame::new(vec![d(2024, 1, 3)])
            .with_column("b", vec![Some(2.0)])
            .unwrap();
        let both = Frame::concat(&[a, b]);
        assert_eq!(both.column_names(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(both.column("a").unwrap(), &[Some(1.0), None]);
        assert_eq!(both.column("b").unwrap(), &[None, Some(2.0)]);
    }

    #[test]
    fn filter_dates_is_inclusive() {
        let frame = sample_frame(10);
        let start = frame.dates()[2];
        let end = frame.dates()[5];
        let filtered = frame.filter_dates(Some(start), Some(end));
        assert_eq!(filtered.len(), 4);
        assert_eq!(filtered.first_date(), Some(start));
        assert_eq!(filtered.last_date(), Some(end));
    }

    #[test]
    fn checksum_is_stable_and_cell_sensitive() {
        let frame = sample_frame(20);
        assert_eq!(frame.content_hash(), frame.clone().content_hash());

        let mut altered = frame.clone();
        let mut close = altered.column(CLOSE).unwrap().to_vec();
        close[7] = close[7].map(|v| v + 0.01);
        altered.set_column(CLOSE, close).unwrap();
        assert_ne!(frame.content_hash(), altered.content_hash());

        let mut nulled = frame.clone();
        let mut volume = nulled.column(VOLUME).unwrap().to_vec();
        volume[0] = None;
        nulled.set_column(VOLUME, volume).unwrap();
        assert_ne!(frame.content_hash(), nulled.content_hash());
    }

    #[test]
    fn dataframe_roundtrip_preserves_checksum() {
        let mut bars = sample_bars(15);
        bars[4].close = f64::NAN;
        let frame = Frame::from_bars(&bars);

        let df = frame.to_dataframe().unwrap();
        assert_eq!(df.height(), 15);
        let back = Frame::from_dataframe(&df).unwrap();

        assert_eq!(back, frame);
        assert_eq!(back.content_hash(), frame.content_hash());
    }
}
