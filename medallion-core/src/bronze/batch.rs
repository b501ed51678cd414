//! Bronze catalog record and its SQLite mapping.

use crate::catalog::{format_date, format_timestamp, parse_date, parse_timestamp};
use crate::error::{Error, IntegrityFault, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Row, Transaction};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Version of the raw-batch layout written by this crate.
pub const SCHEMA_VERSION: u32 = 1;

pub(crate) const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS bronze_batches (
    batch_id        TEXT PRIMARY KEY,
    symbol          TEXT NOT NULL,
    source          TEXT NOT NULL,
    ingested_at     TEXT NOT NULL,
    ingested_at_us  INTEGER NOT NULL,
    row_count       INTEGER NOT NULL,
    checksum        TEXT NOT NULL,
    schema_version  INTEGER NOT NULL,
    file_path       TEXT NOT NULL,
    start_date      TEXT NOT NULL,
    end_date        TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_bronze_symbol_source_time
    ON bronze_batches (symbol, source, ingested_at_us);
";

pub(crate) const SELECT_COLUMNS: &str = "batch_id, symbol, source, ingested_at, row_count, \
     checksum, schema_version, file_path, start_date, end_date";

/// Metadata for one immutable raw batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BronzeBatch {
    pub batch_id: String,
    pub symbol: String,
    pub source: String,
    pub ingested_at: DateTime<Utc>,
    pub row_count: usize,
    /// BLAKE3 content checksum of the rows, see `Frame::content_hash`.
    pub checksum: String,
    pub schema_version: u32,
    /// Relative to the Bronze storage root.
    pub file_path: PathBuf,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

/// Outcome of re-verifying a cataloged batch against its backing file.
#[derive(Debug, Clone, PartialEq)]
pub enum IntegrityStatus {
    Verified,
    Faulted(IntegrityFault),
}

impl IntegrityStatus {
    pub fn is_verified(&self) -> bool {
        matches!(self, IntegrityStatus::Verified)
    }
}

pub(crate) struct BronzeRow {
    batch_id: String,
    symbol: String,
    source: String,
    ingested_at: String,
    row_count: i64,
    checksum: String,
    schema_version: i64,
    file_path: String,
    start_date: String,
    end_date: String,
}

pub(crate) fn read_row(row: &Row<'_>) -> rusqlite::Result<BronzeRow> {
    Ok(BronzeRow {
        batch_id: row.get(0)?,
        symbol: row.get(1)?,
        source: row.get(2)?,
        ingested_at: row.get(3)?,
        row_count: row.get(4)?,
        checksum: row.get(5)?,
        schema_version: row.get(6)?,
        file_path: row.get(7)?,
        start_date: row.get(8)?,
        end_date: row.get(9)?,
    })
}

impl TryFrom<BronzeRow> for BronzeBatch {
    type Error = Error;

    fn try_from(row: BronzeRow) -> Result<Self> {
        let count = |v: i64, what: &str| {
            u32::try_from(v)
                .map_err(|_| Error::CatalogRecord(format!("negative {what} for {}", row.batch_id)))
        };
        Ok(BronzeBatch {
            row_count: count(row.row_count, "row_count")? as usize,
            schema_version: count(row.schema_version, "schema_version")?,
            ingested_at: parse_timestamp(&row.ingested_at)?,
            start_date: parse_date(&row.start_date)?,
            end_date: parse_date(&row.end_date)?,
            file_path: PathBuf::from(&row.file_path),
            batch_id: row.batch_id,
            symbol: row.symbol,
            source: row.source,
            checksum: row.checksum,
        })
    }
}

pub(crate) fn insert(tx: &Transaction<'_>, batch: &BronzeBatch) -> Result<()> {
    tx.execute(
        "INSERT INTO bronze_batches (batch_id, symbol, source, ingested_at, ingested_at_us, \
         row_count, checksum, schema_version, file_path, start_date, end_date) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            batch.batch_id,
            batch.symbol,
            batch.source,
            format_timestamp(batch.ingested_at),
            batch.ingested_at.timestamp_micros(),
            batch.row_count as i64,
            batch.checksum,
            batch.schema_version,
            batch.file_path.to_string_lossy(),
            format_date(batch.start_date),
            format_date(batch.end_date),
        ],
    )?;
    Ok(())
}
