//! Feature contracts: the declared schema shared by training and inference.
//!
//! A contract is identified by `name@version`. The same identity must always
//! describe the same definition; the Gold catalog enforces that by comparing
//! fingerprints when a contract is registered.

use crate::error::{Error, Result};
use crate::gold::artifact::{SAMPLE_COLUMN, STEP_COLUMN};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NormalizationMethod {
    #[default]
    Zscore,
    Minmax,
    None,
}

impl NormalizationMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            NormalizationMethod::Zscore => "zscore",
            NormalizationMethod::Minmax => "minmax",
            NormalizationMethod::None => "none",
        }
    }
}

impl fmt::Display for NormalizationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NormalizationMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "zscore" => Ok(NormalizationMethod::Zscore),
            "minmax" => Ok(NormalizationMethod::Minmax),
            "none" => Ok(NormalizationMethod::None),
            other => Err(Error::InvalidContract(format!(
                "unknown normalization method '{other}'"
            ))),
        }
    }
}

/// Inclusive range a feature's raw values are expected to fall in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureRange {
    pub min: f64,
    pub max: f64,
}

impl FeatureRange {
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// `name@version`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContractId {
    pub name: String,
    pub version: String,
}

impl fmt::Display for ContractId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureContract {
    pub name: String,
    pub version: String,
    /// Ordered; this order is the feature axis of every Gold tensor.
    pub features: Vec<String>,
    /// Timesteps per sample.
    pub sequence_length: usize,
    #[serde(default)]
    pub normalization: NormalizationMethod,
    #[serde(default)]
    pub expected_ranges: BTreeMap<String, FeatureRange>,
}

impl FeatureContract {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        features: Vec<String>,
        sequence_length: usize,
        normalization: NormalizationMethod,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            features,
            sequence_length,
            normalization,
            expected_ranges: BTreeMap::new(),
        }
    }

    /// Contract over the full default Silver feature set.
    pub fn standard(name: impl Into<String>, sequence_length: usize) -> Self {
        let features = [
            "close",
            "volume",
            "returns",
            "rsi_14",
            "macd",
            "macd_signal",
            "macd_hist",
            "volatility_20",
            "volume_change",
            "momentum_5",
            "momentum_10",
            "momentum_20",
            "bb_upper",
            "bb_middle",
            "bb_lower",
            "bb_width",
            "atr_14",
        ];
        Self::new(
            name,
            "1",
            features.iter().map(|f| f.to_string()).collect(),
            sequence_length,
            NormalizationMethod::Zscore,
        )
        .with_range("rsi_14", 0.0, 100.0)
    }

    pub fn with_range(mut self, feature: impl Into<String>, min: f64, max: f64) -> Self {
        self.expected_ranges
            .insert(feature.into(), FeatureRange { min, max });
        self
    }

    pub fn id(&self) -> ContractId {
        ContractId {
            name: self.name.clone(),
            version: self.version.clone(),
        }
    }

    pub fn num_features(&self) -> usize {
        self.features.len()
    }

    /// BLAKE3 over the canonical JSON encoding (ranges are a `BTreeMap`, so
    /// key order is stable).
    pub fn fingerprint(&self) -> Result<String> {
        let json = serde_json::to_vec(self)?;
        Ok(blake3::hash(&json).to_hex().to_string())
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(Error::InvalidContract(format!("{}: {msg}", self.id())));
        if self.name.trim().is_empty() || self.version.trim().is_empty() {
            return invalid("name and version must be non-empty".into());
        }
        if self.features.is_empty() {
            return invalid("feature list is empty".into());
        }
        if self.sequence_length == 0 {
            return invalid("sequence_length must be >= 1".into());
        }
        let mut seen = HashSet::new();
        for feature in &self.features {
            if !seen.insert(feature.as_str()) {
                return invalid(format!("feature '{feature}' listed twice"));
            }
            if feature == SAMPLE_COLUMN || feature == STEP_COLUMN {
                return invalid(format!("feature name '{feature}' is reserved by the tensor layout"));
            }
        }
        for (feature, range) in &self.expected_ranges {
            if !seen.contains(feature.as_str()) {
                return invalid(format!("range given for unknown feature '{feature}'"));
            }
            if range.min.is_nan() || range.max.is_nan() || range.min > range.max {
                return invalid(format!("range for '{feature}' has min > max"));
            }
        }
        Ok(())
    }
}
