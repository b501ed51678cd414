//! Error taxonomy shared by the Bronze, Silver and Gold layers.
//!
//! Callers match on the variant to decide policy: schema and quality-gate
//! errors are fatal, integrity faults mean "this batch is unavailable",
//! insufficient data is an expected steady state for young symbols, and a
//! missing normalization means a training pass has to run first.

use chrono::NaiveDate;
use thiserror::Error;

/// Raw input does not have the shape a layer requires. Raised before any write.
#[derive(Debug, Error, PartialEq)]
pub enum SchemaError {
    #[error("missing required column '{0}'")]
    MissingColumn(String),

    #[error("row set is empty")]
    Empty,

    #[error("date index is not time-ordered: {previous} followed by {next} at row {row}")]
    NotTimeOrdered {
        row: usize,
        previous: NaiveDate,
        next: NaiveDate,
    },

    #[error("column '{column}' has {actual} values but the index has {expected}")]
    LengthMismatch {
        column: String,
        expected: usize,
        actual: usize,
    },

    #[error("duplicate column '{0}'")]
    DuplicateColumn(String),

    #[error("invalid {kind} '{value}': must be non-empty and free of path separators")]
    InvalidName { kind: &'static str, value: String },
}

/// On-disk state of a cataloged batch disagrees with its catalog record.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum IntegrityFault {
    #[error("backing file for batch {batch_id} is missing: {path}")]
    MissingFile { batch_id: String, path: String },

    #[error("checksum mismatch for batch {batch_id}: cataloged {stored}, file hashes to {computed}")]
    ChecksumMismatch {
        batch_id: String,
        stored: String,
        computed: String,
    },

    #[error("backing file for batch {batch_id} is unreadable: {reason}")]
    Unreadable { batch_id: String, reason: String },
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("quality gate failed for {symbol}: {}", .issues.join("; "))]
    QualityGate { symbol: String, issues: Vec<String> },

    #[error("integrity fault: {0}")]
    Integrity(#[from] IntegrityFault),

    #[error("insufficient data: need at least {needed} rows, have {available}")]
    InsufficientData { needed: usize, available: usize },

    #[error(
        "no saved normalization for '{symbol}' under contract {contract}; run a training pass first"
    )]
    MissingNormalization { symbol: String, contract: String },

    #[error("contract mismatch for {contract}: {reason}")]
    ContractMismatch { contract: String, reason: String },

    #[error("invalid feature contract: {0}")]
    InvalidContract(String),

    #[error("train ratio must lie strictly between 0 and 1, got {0}")]
    InvalidTrainRatio(f64),

    #[error("batch not found: {0}")]
    BatchNotFound(String),

    #[error("refusing to overwrite immutable file {0}")]
    AlreadyExists(String),

    #[error("catalog error: {0}")]
    Catalog(#[from] rusqlite::Error),

    #[error("malformed catalog record: {0}")]
    CatalogRecord(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parquet I/O error: {0}")]
    Parquet(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(String),
}

impl Error {
    /// True for the "not enough history yet" condition, which callers treat as
    /// an empty result rather than a failure.
    pub fn is_insufficient_data(&self) -> bool {
        matches!(self, Error::InsufficientData { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
