//! Per-feature normalization: fit on one slice of rows, apply to any other.

use super::select::FeatureMatrix;
use crate::contract::{FeatureContract, NormalizationMethod};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Standard deviations (or ranges) at or below this are treated as zero.
const ZERO_SCALE: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureScale {
    pub feature: String,
    pub location: f64,
    pub scale: f64,
}

/// Fitted parameters, applied as `(x - location) / scale` per feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizationParams {
    pub method: NormalizationMethod,
    /// In contract feature order.
    pub features: Vec<FeatureScale>,
}

impl NormalizationParams {
    /// Fit over every row of `matrix`.
    ///
    /// z-score uses the population standard deviation; min-max stores the
    /// minimum and the range. A degenerate column gets scale 1.
    pub fn fit(method: NormalizationMethod, matrix: &FeatureMatrix) -> Self {
        let features = matrix
            .features()
            .iter()
            .enumerate()
            .map(|(j, name)| {
                let column = matrix.column(j);
                let (location, scale) = match method {
                    NormalizationMethod::Zscore => zscore_stats(&column),
                    NormalizationMethod::Minmax => minmax_stats(&column),
                    NormalizationMethod::None => (0.0, 1.0),
                };
                FeatureScale {
                    feature: name.clone(),
                    location,
                    scale,
                }
            })
            .collect();
        Self { method, features }
    }

    pub fn feature_names(&self) -> Vec<&str> {
        self.features.iter().map(|f| f.feature.as_str()).collect()
    }

    /// Normalize a copy of `matrix`. Feature order must match exactly.
    pub fn apply(&self, matrix: &FeatureMatrix) -> Result<FeatureMatrix> {
        if self.feature_names() != matrix.features() {
            return Err(Error::ContractMismatch {
                contract: format!("{} normalization", self.method),
                reason: format!(
                    "parameters cover {:?} but rows carry {:?}",
                    self.feature_names(),
                    matrix.features()
                ),
            });
        }
        let mut out = matrix.clone();
        let width = self.features.len();
        for (i, value) in out.values_mut().iter_mut().enumerate() {
            let f = &self.features[i % width];
            *value = (*value - f.location) / f.scale;
        }
        Ok(out)
    }

    /// Check saved parameters still describe `contract`.
    pub fn check_contract(&self, contract: &FeatureContract) -> Result<()> {
        let names = self.feature_names();
        if self.method != contract.normalization || names != contract.features {
            return Err(Error::ContractMismatch {
                contract: contract.id().to_string(),
                reason: format!(
                    "saved parameters are {} over {names:?}, contract wants {} over {:?}",
                    self.method, contract.normalization, contract.features
                ),
            });
        }
        Ok(())
    }
}

fn zscore_stats(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 1.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let std = (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
    (mean, if std > ZERO_SCALE { std } else { 1.0 })
}

fn minmax_stats(values: &[f64]) -> (f64, f64) {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !min.is_finite() || !max.is_finite() {
        return (0.0, 1.0);
    }
    let range = max - min;
    (min, if range > ZERO_SCALE { range } else { 1.0 })
}
