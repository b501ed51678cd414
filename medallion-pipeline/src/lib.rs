//! Medallion Pipeline — orchestration on top of `medallion-core`.
//!
//! This crate provides:
//! - The `Pipeline` orchestrator: full run, inference-ready window, training split
//! - The append-only JSONL lineage log
//! - The market-data source boundary (CSV directory, synthetic random walk)
//! - Tracing subscriber setup for binaries

pub mod error;
pub mod lineage;
pub mod pipeline;
pub mod source;
pub mod telemetry;

pub use error::{PipelineError, Result, SourceError};
pub use lineage::{LineageLog, PipelineLineage, RunKind};
pub use pipeline::{Pipeline, ProcessOptions, TrainingInput, TrainingSet};
pub use source::{read_csv, CsvSource, MarketDataSource, SyntheticSource};
pub use telemetry::init_tracing;
