//! Pipeline configuration, loaded from TOML.
//!
//! ```toml
//! [storage]
//! bronze_root = "data/bronze"
//! silver_root = "data/silver"
//! gold_root = "data/gold"
//! lineage_path = "data/lineage.jsonl"
//!
//! [silver]
//! max_null_fraction = 0.05
//!
//! [[contracts]]
//! name = "lstm"
//! version = "1"
//! features = ["close", "returns", "rsi_14"]
//! sequence_length = 60
//! normalization = "zscore"
//! ```

use crate::contract::FeatureContract;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    pub bronze_root: PathBuf,
    pub silver_root: PathBuf,
    pub gold_root: PathBuf,
    pub lineage_path: PathBuf,
}

impl StorageConfig {
    /// `{dir}/bronze`, `{dir}/silver`, `{dir}/gold`, `{dir}/lineage.jsonl`.
    pub fn rooted_at(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            bronze_root: dir.join("bronze"),
            silver_root: dir.join("silver"),
            gold_root: dir.join("gold"),
            lineage_path: dir.join("lineage.jsonl"),
        }
    }
}

/// Quality thresholds, cleaning rules and indicator periods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SilverConfig {
    /// Fail the quality verdict at or above this fraction of null cells.
    pub max_null_fraction: f64,
    /// Clip OHLC values to mean +/- this many standard deviations.
    pub clip_sigma: f64,
    /// IQR fence multiplier for outlier counting.
    pub iqr_multiplier: f64,
    pub rsi_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub volatility_period: usize,
    pub momentum_periods: Vec<usize>,
    pub bollinger_period: usize,
    pub bollinger_multiplier: f64,
    pub atr_period: usize,
}

impl Default for SilverConfig {
    fn default() -> Self {
        Self {
            max_null_fraction: 0.05,
            clip_sigma: 5.0,
            iqr_multiplier: 1.5,
            rsi_period: 14,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            volatility_period: 20,
            momentum_periods: vec![5, 10, 20],
            bollinger_period: 20,
            bollinger_multiplier: 2.0,
            atr_period: 14,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GoldConfig {
    pub default_train_ratio: f64,
}

impl Default for GoldConfig {
    fn default() -> Self {
        Self {
            default_train_ratio: 0.8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub storage: StorageConfig,
    #[serde(default)]
    pub silver: SilverConfig,
    #[serde(default)]
    pub gold: GoldConfig,
    #[serde(default)]
    pub contracts: Vec<FeatureContract>,
}

impl PipelineConfig {
    /// Default settings with every storage root under `dir`.
    pub fn rooted_at(dir: impl AsRef<Path>) -> Self {
        Self {
            storage: StorageConfig::rooted_at(dir),
            silver: SilverConfig::default(),
            gold: GoldConfig::default(),
            contracts: Vec::new(),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("read {}: {e}", path.display())))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| Error::Config(format!("parse TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(format!("serialize config: {e}")))
    }

    pub fn validate(&self) -> Result<()> {
        let s = &self.silver;
        if !(0.0..=1.0).contains(&s.max_null_fraction) {
            return Err(Error::Config(format!(
                "silver.max_null_fraction must be within [0, 1], got {}",
                s.max_null_fraction
            )));
        }
        if s.clip_sigma <= 0.0 || s.iqr_multiplier <= 0.0 {
            return Err(Error::Config(
                "silver.clip_sigma and silver.iqr_multiplier must be positive".into(),
            ));
        }
        if s.macd_fast == 0 || s.macd_slow <= s.macd_fast || s.macd_signal == 0 {
            return Err(Error::Config("silver MACD periods must satisfy 1 <= fast < slow".into()));
        }
        let periods = [s.rsi_period, s.bollinger_period, s.atr_period];
        if periods.contains(&0) || s.momentum_periods.contains(&0) || s.volatility_period < 2 {
            return Err(Error::Config("silver indicator periods must be positive".into()));
        }
        let ratio = self.gold.default_train_ratio;
        if ratio.is_nan() || ratio <= 0.0 || ratio >= 1.0 {
            return Err(Error::Config(format!(
                "gold.default_train_ratio must lie in (0, 1), got {ratio}"
            )));
        }
        for contract in &self.contracts {
            contract.validate()?;
        }
        Ok(())
    }

    /// Look up a contract by `name` (first match) or `name@version`.
    pub fn contract(&self, key: &str) -> Option<&FeatureContract> {
        match key.split_once('@') {
            Some((name, version)) => self
                .contracts
                .iter()
                .find(|c| c.name == name && c.version == version),
            None => self.contracts.iter().find(|c| c.name == key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::NormalizationMethod;

    const SAMPLE: &str = r#"
[storage]
bronze_root = "d/bronze"
silver_root = "d/silver"
gold_root = "d/gold"
lineage_path = "d/lineage.jsonl"

[silver]
clip_sigma = 4.0

[[contracts]]
name = "lstm"
version = "3"
features = ["close", "rsi_14"]
sequence_length = 20
normalization = "minmax"

[contracts.expected_ranges.rsi_14]
min = 0.0
max = 100.0
"#;

    #[test]
    fn parses_partial_sections_with_defaults() {
        let config = PipelineConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(config.silver.clip_sigma, 4.0);
        assert_eq!(config.silver.rsi_period, 14);
        assert_eq!(config.gold.default_train_ratio, 0.8);

        let contract = config.contract("lstm@3").unwrap();
        assert_eq!(contract.normalization, NormalizationMethod::Minmax);
        assert_eq!(contract.expected_ranges["rsi_14"].max, 100.0);
        assert!(config.contract("lstm").is_some());
        assert!(config.contract("lstm@4").is_none());
    }

    #[test]
    fn toml_roundtrip() {
        let mut config = PipelineConfig::rooted_at("data");
        config.contracts.push(FeatureContract::standard("base", 60));
        let text = config.to_toml().unwrap();
        assert_eq!(PipelineConfig::from_toml(&text).unwrap(), config);
    }

    #[test]
    fn rejects_invalid_values() {
        let mut config = PipelineConfig::rooted_at("data");
        config.gold.default_train_ratio = 1.0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::rooted_at("data");
        config.silver.macd_slow = config.silver.macd_fast;
        assert!(config.validate().is_err());

        let bad = SAMPLE.replace("sequence_length = 20", "sequence_length = 0");
        assert!(PipelineConfig::from_toml(&bad).is_err());
    }

    #[test]
    fn rooted_layout() {
        let storage = StorageConfig::rooted_at("/tmp/x");
        assert_eq!(storage.gold_root, PathBuf::from("/tmp/x/gold"));
        assert_eq!(storage.lineage_path, PathBuf::from("/tmp/x/lineage.jsonl"));
    }
}
