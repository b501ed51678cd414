//! Market-data source boundary.
//!
//! The pipeline consumes whatever a source returns as that source's truth for
//! the moment of ingestion. Retry, backoff and fallback between sources are
//! the caller's policy; nothing here retries.

use std::path::{Path, PathBuf};

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use medallion_core::frame::{Bar, Frame};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;

use crate::error::SourceError;

/// Anything that can hand the pipeline a daily OHLCV row set.
pub trait MarketDataSource: Send + Sync {
    /// Label recorded as the Bronze `source`.
    fn name(&self) -> &str;

    /// Bars for `symbol` dated within `[start, end]`.
    fn fetch(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Result<Frame, SourceError>;
}

// ── CSV ──

/// One CSV record. Empty cells deserialize to `None` and become nulls.
#[derive(Debug, Deserialize)]
struct CsvBar {
    #[serde(alias = "Date")]
    date: NaiveDate,
    #[serde(alias = "Open")]
    open: Option<f64>,
    #[serde(alias = "High")]
    high: Option<f64>,
    #[serde(alias = "Low")]
    low: Option<f64>,
    #[serde(alias = "Close")]
    close: Option<f64>,
    #[serde(alias = "Volume")]
    volume: Option<f64>,
}

impl From<CsvBar> for Bar {
    fn from(row: CsvBar) -> Self {
        Bar {
            date: row.date,
            open: row.open.unwrap_or(f64::NAN),
            high: row.high.unwrap_or(f64::NAN),
            low: row.low.unwrap_or(f64::NAN),
            close: row.close.unwrap_or(f64::NAN),
            volume: row.volume.unwrap_or(f64::NAN),
        }
    }
}

/// Read a `date,open,high,low,close,volume` file. Rows are kept in file order;
/// ordering is checked at ingestion.
pub fn read_csv(path: &Path) -> Result<Frame, SourceError> {
    let file = std::fs::File::open(path).map_err(|source| SourceError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(file);

    let mut bars = Vec::new();
    for record in reader.deserialize::<CsvBar>() {
        let record = record.map_err(|source| SourceError::Csv {
            path: path.to_path_buf(),
            source,
        })?;
        bars.push(Bar::from(record));
    }
    Ok(Frame::from_bars(&bars))
}

/// Directory of `{SYMBOL}.csv` files.
#[derive(Debug, Clone)]
pub struct CsvSource {
    dir: PathBuf,
}

impl CsvSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, symbol: &str) -> PathBuf {
        self.dir.join(format!("{symbol}.csv"))
    }
}

impl MarketDataSource for CsvSource {
    fn name(&self) -> &str {
        "csv"
    }

    fn fetch(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Result<Frame, SourceError> {
        check_range(start, end)?;
        let rows = read_csv(&self.path_for(symbol))?.filter_dates(Some(start), Some(end));
        if rows.is_empty() {
            return Err(SourceError::NoData {
                symbol: symbol.to_string(),
                start,
                end,
            });
        }
        Ok(rows)
    }
}

// ── Synthetic ──

/// Deterministic random walk, seeded from the symbol name. Weekdays only.
#[derive(Debug, Clone)]
pub struct SyntheticSource {
    start_price: f64,
}

impl Default for SyntheticSource {
    fn default() -> Self {
        Self { start_price: 100.0 }
    }
}

impl SyntheticSource {
    pub fn new(start_price: f64) -> Self {
        Self { start_price }
    }

    /// Exactly `count` weekday bars starting at the first weekday on or after
    /// `start`.
    pub fn generate(&self, symbol: &str, start: NaiveDate, count: usize) -> Frame {
        let mut walk = Walk::new(symbol, self.start_price);
        let bars: Vec<Bar> = weekdays_from(start).take(count).map(|d| walk.bar(d)).collect();
        Frame::from_bars(&bars)
    }
}

impl MarketDataSource for SyntheticSource {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn fetch(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Result<Frame, SourceError> {
        check_range(start, end)?;
        let mut walk = Walk::new(symbol, self.start_price);
        let bars: Vec<Bar> = weekdays_from(start)
            .take_while(|d| *d <= end)
            .map(|d| walk.bar(d))
            .collect();
        if bars.is_empty() {
            return Err(SourceError::NoData {
                symbol: symbol.to_string(),
                start,
                end,
            });
        }
        Ok(Frame::from_bars(&bars))
    }
}

struct Walk {
    rng: StdRng,
    price: f64,
}

impl Walk {
    fn new(symbol: &str, start_price: f64) -> Self {
        let seed: [u8; 32] = *blake3::hash(symbol.as_bytes()).as_bytes();
        Self {
            rng: StdRng::from_seed(seed),
            price: start_price,
        }
    }

    fn bar(&mut self, date: NaiveDate) -> Bar {
        let daily_return: f64 = self.rng.gen_range(-0.03..0.03);
        let open = self.price;
        let close = open * (1.0 + daily_return);
        let high = open.max(close) * (1.0 + self.rng.gen_range(0.0..0.01));
        let low = open.min(close) * (1.0 - self.rng.gen_range(0.0..0.01));
        let volume = self.rng.gen_range(500_000..5_000_000u64) as f64;
        self.price = close;
        Bar {
            date,
            open,
            high,
            low,
            close,
            volume,
        }
    }
}

fn weekdays_from(start: NaiveDate) -> impl Iterator<Item = NaiveDate> {
    std::iter::successors(Some(start), |d| d.checked_add_signed(Duration::days(1)))
        .filter(|d| !matches!(d.weekday(), Weekday::Sat | Weekday::Sun))
}

fn check_range(start: NaiveDate, end: NaiveDate) -> Result<(), SourceError> {
    if start > end {
        return Err(SourceError::InvalidRange { start, end });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn synthetic_is_deterministic_per_symbol() {
        let source = SyntheticSource::default();
        let a = source.generate("DEMO", date(2024, 1, 1), 50);
        let b = source.generate("DEMO", date(2024, 1, 1), 50);
        let c = source.generate("OTHER", date(2024, 1, 1), 50);
        assert_eq!(a, b);
        assert_ne!(a.content_hash(), c.content_hash());
        assert_eq!(a.len(), 50);
        a.validate_ohlcv().unwrap();
    }

    #[test]
    fn synthetic_skips_weekends() {
        // 2024-01-06 is a Saturday
        let frame = SyntheticSource::default()
            .fetch("DEMO", date(2024, 1, 5), date(2024, 1, 9))
            .unwrap();
        assert_eq!(frame.dates(), &[date(2024, 1, 5), date(2024, 1, 8), date(2024, 1, 9)]);
    }

    #[test]
    fn synthetic_bars_are_ohlc_consistent() {
        let frame = SyntheticSource::default().generate("DEMO", date(2024, 1, 1), 200);
        let (o, h, l, c) = (
            frame.series("open").unwrap(),
            frame.series("high").unwrap(),
            frame.series("low").unwrap(),
            frame.series("close").unwrap(),
        );
        for i in 0..frame.len() {
            assert!(h[i] >= o[i].max(c[i]) && l[i] <= o[i].min(c[i]), "row {i}");
        }
    }

    #[test]
    fn csv_empty_cells_become_nulls() {
        let dir = TempDir::new().unwrap();
        let mut file = std::fs::File::create(dir.path().join("SPY.csv")).unwrap();
        writeln!(file, "date,open,high,low,close,volume").unwrap();
        writeln!(file, "2024-01-02,100,102,99,101,1000").unwrap();
        writeln!(file, "2024-01-03,101,103,100,,1100").unwrap();
        writeln!(file, "2024-01-04,102,104,101,103,1200").unwrap();
        drop(file);

        let source = CsvSource::new(dir.path());
        let frame = source.fetch("SPY", date(2024, 1, 1), date(2024, 1, 3)).unwrap();
        assert_eq!(frame.len(), 2);
        assert_eq!(frame.column("close").unwrap(), &[Some(101.0), None]);
        assert_eq!(frame.column("volume").unwrap()[1], Some(1100.0));
    }

    #[test]
    fn csv_accepts_capitalized_headers() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("QQQ.csv");
        std::fs::write(&path, "Date,Open,High,Low,Close,Volume\n2024-01-02,1,2,0.5,1.5,10\n").unwrap();
        assert_eq!(read_csv(&path).unwrap().column("close").unwrap(), &[Some(1.5)]);
    }

    #[test]
    fn csv_errors_are_typed() {
        let dir = TempDir::new().unwrap();
        let missing = CsvSource::new(dir.path()).fetch("NOPE", date(2024, 1, 1), date(2024, 2, 1));
        assert!(matches!(missing, Err(SourceError::Io { .. })));

        let path = dir.path().join("BAD.csv");
        std::fs::write(&path, "date,open,high,low,close,volume\nnot-a-date,1,2,0.5,1.5,10\n").unwrap();
        assert!(matches!(read_csv(&path), Err(SourceError::Csv { .. })));

        let range = SyntheticSource::default().fetch("X", date(2024, 2, 1), date(2024, 1, 1));
        assert!(matches!(range, Err(SourceError::InvalidRange { .. })));
    }
}
