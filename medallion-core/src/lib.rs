//! Medallion Core — the Bronze, Silver and Gold layers of the feature pipeline.
//!
//! - Bronze: immutable, checksummed raw OHLCV batches with merge-on-read history
//! - Silver: quality assessment, cleaning and causal indicator enrichment
//! - Gold: feature contracts, versioned normalization and windowed tensors
//!
//! Each layer owns a storage root with its own SQLite catalog and can be
//! rebuilt from the layer before it.

pub mod bronze;
pub mod catalog;
pub mod config;
pub mod contract;
pub mod error;
pub mod frame;
pub mod gold;
pub mod ids;
pub mod indicators;
pub mod silver;
pub mod storage;
pub mod tensor;

pub use bronze::{BronzeBatch, BronzeStore, IntegrityStatus};
pub use config::{GoldConfig, PipelineConfig, SilverConfig, StorageConfig};
pub use contract::{ContractId, FeatureContract, FeatureRange, NormalizationMethod};
pub use error::{Error, IntegrityFault, Result, SchemaError};
pub use frame::{Bar, Frame};
pub use gold::{GoldArtifacts, GoldBatch, GoldBuilder, NormalizationParams, ParamVersion};
pub use silver::{DataQualityReport, SilverBatch, SilverOutput, SilverProcessor};
pub use tensor::Tensor3;
