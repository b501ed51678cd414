use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the orchestrator and its collaborators.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Core(#[from] medallion_core::Error),

    #[error("lineage log {}: {source}", .path.display())]
    LineageIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("lineage record could not be encoded: {0}")]
    LineageEncode(#[from] serde_json::Error),

    #[error("lineage already holds a record for run {0}")]
    DuplicateRun(String),

    #[error("market data: {0}")]
    Source(#[from] SourceError),
}

impl PipelineError {
    /// True when the underlying layer reported too few rows.
    pub fn is_insufficient_data(&self) -> bool {
        matches!(self, PipelineError::Core(e) if e.is_insufficient_data())
    }
}

/// Errors from a market-data source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("cannot read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed CSV in {}: {source}", .path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("no bars for '{symbol}' between {start} and {end}")]
    NoData {
        symbol: String,
        start: chrono::NaiveDate,
        end: chrono::NaiveDate,
    },

    #[error("invalid date range: {start} is after {end}")]
    InvalidRange {
        start: chrono::NaiveDate,
        end: chrono::NaiveDate,
    },
}

pub type Result<T> = std::result::Result<T, PipelineError>;
