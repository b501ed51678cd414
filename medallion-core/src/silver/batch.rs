//! Silver catalog records: feature batches and their quality reports.

use super::quality::{DataQualityReport, QualityStage};
use crate::catalog::{format_date, format_timestamp, parse_date, parse_timestamp};
use crate::error::{Error, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Row, Transaction};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub(crate) const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS silver_batches (
    batch_id         TEXT PRIMARY KEY,
    symbol           TEXT NOT NULL,
    bronze_batch_id  TEXT NOT NULL,
    row_count        INTEGER NOT NULL,
    feature_columns  TEXT NOT NULL,
    start_date       TEXT NOT NULL,
    end_date         TEXT NOT NULL,
    quality_score    REAL NOT NULL,
    checksum         TEXT NOT NULL,
    created_at       TEXT NOT NULL,
    created_at_us    INTEGER NOT NULL,
    file_path        TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_silver_symbol_time ON silver_batches (symbol, created_at_us);
CREATE INDEX IF NOT EXISTS idx_silver_bronze ON silver_batches (bronze_batch_id);

CREATE TABLE IF NOT EXISTS quality_reports (
    batch_id          TEXT NOT NULL,
    stage             TEXT NOT NULL,
    symbol            TEXT NOT NULL,
    passed            INTEGER NOT NULL,
    completeness_pct  REAL NOT NULL,
    report            TEXT NOT NULL,
    assessed_at       TEXT NOT NULL,
    PRIMARY KEY (batch_id, stage)
);
";

pub(crate) const SELECT_COLUMNS: &str = "batch_id, symbol, bronze_batch_id, row_count, \
     feature_columns, start_date, end_date, quality_score, checksum, created_at, file_path";

/// Metadata for one cleaned, enriched feature batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SilverBatch {
    pub batch_id: String,
    pub symbol: String,
    /// The Bronze batch these rows were derived from.
    pub bronze_batch_id: String,
    pub row_count: usize,
    /// Every column in the stored frame, in order (OHLCV first).
    pub feature_columns: Vec<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// Completeness of the cleaned output, 0-1.
    pub quality_score: f64,
    pub checksum: String,
    pub created_at: DateTime<Utc>,
    /// Relative to the Silver storage root.
    pub file_path: PathBuf,
}

pub(crate) struct SilverRow {
    batch_id: String,
    symbol: String,
    bronze_batch_id: String,
    row_count: i64,
    feature_columns: String,
    start_date: String,
    end_date: String,
    quality_score: f64,
    checksum: String,
    created_at: String,
    file_path: String,
}

pub(crate) fn read_row(row: &Row<'_>) -> rusqlite::Result<SilverRow> {
    Ok(SilverRow {
        batch_id: row.get(0)?,
        symbol: row.get(1)?,
        bronze_batch_id: row.get(2)?,
        row_count: row.get(3)?,
        feature_columns: row.get(4)?,
        start_date: row.get(5)?,
        end_date: row.get(6)?,
        quality_score: row.get(7)?,
        checksum: row.get(8)?,
        created_at: row.get(9)?,
        file_path: row.get(10)?,
    })
}

impl TryFrom<SilverRow> for SilverBatch {
    type Error = Error;

    fn try_from(row: SilverRow) -> Result<Self> {
        let row_count = usize::try_from(row.row_count).map_err(|_| {
            Error::CatalogRecord(format!("negative row_count for {}", row.batch_id))
        })?;
        Ok(SilverBatch {
            row_count,
            feature_columns: serde_json::from_str(&row.feature_columns)?,
            start_date: parse_date(&row.start_date)?,
            end_date: parse_date(&row.end_date)?,
            created_at: parse_timestamp(&row.created_at)?,
            file_path: PathBuf::from(row.file_path),
            batch_id: row.batch_id,
            symbol: row.symbol,
            bronze_batch_id: row.bronze_batch_id,
            quality_score: row.quality_score,
            checksum: row.checksum,
        })
    }
}

pub(crate) fn insert(tx: &Transaction<'_>, batch: &SilverBatch) -> Result<()> {
    tx.execute(
        "INSERT INTO silver_batches (batch_id, symbol, bronze_batch_id, row_count, \
         feature_columns, start_date, end_date, quality_score, checksum, created_at, \
         created_at_us, file_path) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            batch.batch_id,
            batch.symbol,
            batch.bronze_batch_id,
            batch.row_count as i64,
            serde_json::to_string(&batch.feature_columns)?,
            format_date(batch.start_date),
            format_date(batch.end_date),
            batch.quality_score,
            batch.checksum,
            format_timestamp(batch.created_at),
            batch.created_at.timestamp_micros(),
            batch.file_path.to_string_lossy(),
        ],
    )?;
    Ok(())
}

pub(crate) fn insert_report(tx: &Transaction<'_>, report: &DataQualityReport) -> Result<()> {
    tx.execute(
        "INSERT OR REPLACE INTO quality_reports \
         (batch_id, stage, symbol, passed, completeness_pct, report, assessed_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            report.batch_id,
            report.stage.as_str(),
            report.symbol,
            report.passed,
            report.completeness_pct,
            serde_json::to_string(report)?,
            format_timestamp(report.assessed_at),
        ],
    )?;
    Ok(())
}

pub(crate) fn decode_report(stage: &str, json: &str) -> Result<DataQualityReport> {
    let report: DataQualityReport = serde_json::from_str(json)?;
    match QualityStage::parse(stage) {
        Some(parsed) if parsed == report.stage => Ok(report),
        _ => Err(Error::CatalogRecord(format!(
            "quality report for {} has stage column '{stage}' but body '{}'",
            report.batch_id,
            report.stage.as_str()
        ))),
    }
}
