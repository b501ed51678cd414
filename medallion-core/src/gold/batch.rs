//! Gold catalog: tensor batches, registered contracts and the versioned
//! normalization store.
//!
//! Normalization parameters are keyed by (symbol, contract name, contract
//! version, param version). Exactly one version per key is current; a refit
//! adds a version and moves the pointer in the same transaction.

use super::normalize::NormalizationParams;
use crate::catalog::{format_timestamp, parse_timestamp};
use crate::contract::{ContractId, FeatureContract};
use crate::error::{Error, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub(crate) const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS gold_batches (
    batch_id               TEXT PRIMARY KEY,
    symbol                 TEXT NOT NULL,
    silver_batch_id        TEXT,
    contract_name          TEXT NOT NULL,
    contract_version       TEXT NOT NULL,
    samples                INTEGER NOT NULL,
    num_features           INTEGER NOT NULL,
    sequence_length        INTEGER NOT NULL,
    normalization_version  INTEGER NOT NULL,
    created_at             TEXT NOT NULL,
    created_at_us          INTEGER NOT NULL,
    metadata               TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_gold_symbol_time ON gold_batches (symbol, created_at_us);

CREATE TABLE IF NOT EXISTS feature_contracts (
    name           TEXT NOT NULL,
    version        TEXT NOT NULL,
    fingerprint    TEXT NOT NULL,
    definition     TEXT NOT NULL,
    registered_at  TEXT NOT NULL,
    PRIMARY KEY (name, version)
);

CREATE TABLE IF NOT EXISTS normalization_params (
    symbol            TEXT NOT NULL,
    contract_name     TEXT NOT NULL,
    contract_version  TEXT NOT NULL,
    version           INTEGER NOT NULL,
    method            TEXT NOT NULL,
    params            TEXT NOT NULL,
    gold_batch_id     TEXT,
    fitted_at         TEXT NOT NULL,
    is_current        INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (symbol, contract_name, contract_version, version)
);
";

/// Sizes of a temporal train/test split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitInfo {
    pub train_ratio: f64,
    pub train_rows: usize,
    pub test_rows: usize,
    pub train_samples: usize,
    pub test_samples: usize,
    /// First date of the test partition, if it has any rows.
    pub test_start: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoldBatch {
    pub batch_id: String,
    pub symbol: String,
    /// `None` when the rows were handed in directly rather than read from Silver.
    pub silver_batch_id: Option<String>,
    pub contract_name: String,
    pub contract_version: String,
    pub samples: usize,
    pub num_features: usize,
    pub sequence_length: usize,
    pub normalization: NormalizationParams,
    pub normalization_version: u32,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// Contract features that were absent upstream and zero-filled.
    pub substituted_features: Vec<String>,
    pub range_warnings: Vec<String>,
    pub split: Option<SplitInfo>,
    /// Tensor files relative to the Gold root; empty for ephemeral batches.
    pub tensor_files: Vec<PathBuf>,
    pub created_at: DateTime<Utc>,
}

impl GoldBatch {
    pub fn contract_id(&self) -> ContractId {
        ContractId {
            name: self.contract_name.clone(),
            version: self.contract_version.clone(),
        }
    }

    /// True when at least one feature column was substituted with zeros.
    pub fn is_degraded(&self) -> bool {
        !self.substituted_features.is_empty()
    }

    pub fn is_persisted(&self) -> bool {
        !self.tensor_files.is_empty()
    }
}

/// One saved parameter set and its place in the version history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredNormalization {
    pub symbol: String,
    pub contract: ContractId,
    pub version: u32,
    pub params: NormalizationParams,
    pub gold_batch_id: Option<String>,
    pub fitted_at: DateTime<Utc>,
    pub is_current: bool,
}

pub(crate) fn insert_batch(tx: &Transaction<'_>, batch: &GoldBatch) -> Result<()> {
    tx.execute(
        "INSERT INTO gold_batches (batch_id, symbol, silver_batch_id, contract_name, \
         contract_version, samples, num_features, sequence_length, normalization_version, \
         created_at, created_at_us, metadata) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            batch.batch_id,
            batch.symbol,
            batch.silver_batch_id,
            batch.contract_name,
            batch.contract_version,
            batch.samples as i64,
            batch.num_features as i64,
            batch.sequence_length as i64,
            batch.normalization_version,
            format_timestamp(batch.created_at),
            batch.created_at.timestamp_micros(),
            serde_json::to_string(batch)?,
        ],
    )?;
    Ok(())
}

pub(crate) fn load_batch(conn: &Connection, batch_id: &str) -> Result<Option<GoldBatch>> {
    let json: Option<String> = conn
        .query_row(
            "SELECT metadata FROM gold_batches WHERE batch_id = ?1",
            params![batch_id],
            |r| r.get(0),
        )
        .optional()?;
    json.map(|j| serde_json::from_str(&j).map_err(Error::from))
        .transpose()
}

pub(crate) fn list_batches(conn: &Connection, symbol: &str) -> Result<Vec<GoldBatch>> {
    let mut stmt = conn.prepare(
        "SELECT metadata FROM gold_batches WHERE symbol = ?1 ORDER BY created_at_us, rowid",
    )?;
    let rows = stmt.query_map(params![symbol], |r| r.get::<_, String>(0))?;
    let mut out = Vec::new();
    for json in rows {
        out.push(serde_json::from_str(&json?)?);
    }
    Ok(out)
}

/// Record a contract identity, or confirm an existing record matches it.
pub(crate) fn register_contract(
    tx: &Transaction<'_>,
    contract: &FeatureContract,
    at: DateTime<Utc>,
) -> Result<bool> {
    let fingerprint = contract.fingerprint()?;
    let existing = stored_fingerprint(tx, &contract.id())?;
    match existing {
        Some(stored) if stored == fingerprint => Ok(false),
        Some(_) => Err(Error::ContractMismatch {
            contract: contract.id().to_string(),
            reason: "a different definition is already registered under this name and version"
                .into(),
        }),
        None => {
            tx.execute(
                "INSERT INTO feature_contracts (name, version, fingerprint, definition, registered_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    contract.name,
                    contract.version,
                    fingerprint,
                    serde_json::to_string(contract)?,
                    format_timestamp(at),
                ],
            )?;
            Ok(true)
        }
    }
}

pub(crate) fn stored_fingerprint(conn: &Connection, id: &ContractId) -> Result<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT fingerprint FROM feature_contracts WHERE name = ?1 AND version = ?2",
            params![id.name, id.version],
            |r| r.get(0),
        )
        .optional()?)
}

pub(crate) fn load_contract(conn: &Connection, id: &ContractId) -> Result<Option<FeatureContract>> {
    let json: Option<String> = conn
        .query_row(
            "SELECT definition FROM feature_contracts WHERE name = ?1 AND version = ?2",
            params![id.name, id.version],
            |r| r.get(0),
        )
        .optional()?;
    json.map(|j| serde_json::from_str(&j).map_err(Error::from))
        .transpose()
}

/// Append a new parameter version and make it current. Returns the version.
pub(crate) fn save_params(
    tx: &Transaction<'_>,
    symbol: &str,
    contract: &ContractId,
    params: &NormalizationParams,
    gold_batch_id: &str,
    at: DateTime<Utc>,
) -> Result<u32> {
    let latest: u32 = tx.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM normalization_params \
         WHERE symbol = ?1 AND contract_name = ?2 AND contract_version = ?3",
        params![symbol, contract.name, contract.version],
        |r| r.get(0),
    )?;
    let version = latest + 1;
    tx.execute(
        "UPDATE normalization_params SET is_current = 0 \
         WHERE symbol = ?1 AND contract_name = ?2 AND contract_version = ?3",
        params![symbol, contract.name, contract.version],
    )?;
    tx.execute(
        "INSERT INTO normalization_params (symbol, contract_name, contract_version, version, \
         method, params, gold_batch_id, fitted_at, is_current) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1)",
        params![
            symbol,
            contract.name,
            contract.version,
            version,
            params.method.as_str(),
            serde_json::to_string(params)?,
            gold_batch_id,
            format_timestamp(at),
        ],
    )?;
    Ok(version)
}

/// Move the current pointer to an existing version.
pub(crate) fn set_current(
    tx: &Transaction<'_>,
    symbol: &str,
    contract: &ContractId,
    version: u32,
) -> Result<bool> {
    let exists: bool = tx.query_row(
        "SELECT EXISTS (SELECT 1 FROM normalization_params \
         WHERE symbol = ?1 AND contract_name = ?2 AND contract_version = ?3 AND version = ?4)",
        params![symbol, contract.name, contract.version, version],
        |r| r.get(0),
    )?;
    if !exists {
        return Ok(false);
    }
    tx.execute(
        "UPDATE normalization_params SET is_current = (version = ?4) \
         WHERE symbol = ?1 AND contract_name = ?2 AND contract_version = ?3",
        params![symbol, contract.name, contract.version, version],
    )?;
    Ok(true)
}

const PARAM_COLUMNS: &str =
    "symbol, contract_name, contract_version, version, params, gold_batch_id, fitted_at, is_current";

struct ParamRow {
    symbol: String,
    contract_name: String,
    contract_version: String,
    version: u32,
    params: String,
    gold_batch_id: Option<String>,
    fitted_at: String,
    is_current: bool,
}

fn read_param_row(row: &Row<'_>) -> rusqlite::Result<ParamRow> {
    Ok(ParamRow {
        symbol: row.get(0)?,
        contract_name: row.get(1)?,
        contract_version: row.get(2)?,
        version: row.get(3)?,
        params: row.get(4)?,
        gold_batch_id: row.get(5)?,
        fitted_at: row.get(6)?,
        is_current: row.get(7)?,
    })
}

impl TryFrom<ParamRow> for StoredNormalization {
    type Error = Error;

    fn try_from(row: ParamRow) -> Result<Self> {
        Ok(StoredNormalization {
            params: serde_json::from_str(&row.params)?,
            fitted_at: parse_timestamp(&row.fitted_at)?,
            symbol: row.symbol,
            contract: ContractId {
                name: row.contract_name,
                version: row.contract_version,
            },
            version: row.version,
            gold_batch_id: row.gold_batch_id,
            is_current: row.is_current,
        })
    }
}

/// Which parameter version to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamVersion {
    Current,
    Pinned(u32),
}

pub(crate) fn load_params(
    conn: &Connection,
    symbol: &str,
    contract: &ContractId,
    which: ParamVersion,
) -> Result<Option<StoredNormalization>> {
    let base = format!(
        "SELECT {PARAM_COLUMNS} FROM normalization_params \
         WHERE symbol = ?1 AND contract_name = ?2 AND contract_version = ?3"
    );
    let row = match which {
        ParamVersion::Current => conn.query_row(
            &format!("{base} AND is_current = 1"),
            params![symbol, contract.name, contract.version],
            read_param_row,
        ),
        ParamVersion::Pinned(version) => conn.query_row(
            &format!("{base} AND version = ?4"),
            params![symbol, contract.name, contract.version, version],
            read_param_row,
        ),
    }
    .optional()?;
    row.map(StoredNormalization::try_from).transpose()
}

pub(crate) fn list_params(
    conn: &Connection,
    symbol: &str,
    contract: &ContractId,
) -> Result<Vec<StoredNormalization>> {
    let sql = format!(
        "SELECT {PARAM_COLUMNS} FROM normalization_params \
         WHERE symbol = ?1 AND contract_name = ?2 AND contract_version = ?3 ORDER BY version"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![symbol, contract.name, contract.version], read_param_row)?;
    let raw = rows.collect::<rusqlite::Result<Vec<_>>>()?;
    raw.into_iter().map(StoredNormalization::try_from).collect()
}
