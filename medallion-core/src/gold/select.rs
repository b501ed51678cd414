//! Feature selection: pull a contract's columns out of Silver rows into a
//! dense row-major matrix.

use crate::contract::FeatureContract;
use crate::frame::Frame;
use chrono::NaiveDate;
use tracing::warn;

/// Dense `rows x features` matrix in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    dates: Vec<NaiveDate>,
    features: Vec<String>,
    values: Vec<f64>,
}

impl FeatureMatrix {
    /// Build from column vectors of equal length, without dates.
    pub fn from_columns(features: Vec<String>, columns: Vec<Vec<f64>>) -> Self {
        let rows = columns.first().map_or(0, Vec::len);
        let mut values = Vec::with_capacity(rows * features.len());
        for i in 0..rows {
            values.extend(columns.iter().map(|c| c[i]));
        }
        Self {
            dates: Vec::new(),
            features,
            values,
        }
    }

    pub fn rows(&self) -> usize {
        if self.features.is_empty() {
            0
        } else {
            self.values.len() / self.features.len()
        }
    }

    pub fn width(&self) -> usize {
        self.features.len()
    }

    pub fn features(&self) -> &[String] {
        &self.features
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub(crate) fn values_mut(&mut self) -> &mut [f64] {
        &mut self.values
    }

    pub fn row(&self, i: usize) -> &[f64] {
        let w = self.width();
        &self.values[i * w..(i + 1) * w]
    }

    pub fn column(&self, j: usize) -> Vec<f64> {
        (0..self.rows()).map(|i| self.values[i * self.width() + j]).collect()
    }

    /// Rows `[start, end)`.
    pub fn slice(&self, start: usize, end: usize) -> FeatureMatrix {
        let w = self.width();
        let end = end.min(self.rows());
        let start = start.min(end);
        FeatureMatrix {
            dates: self.dates.get(start..end).map(<[_]>::to_vec).unwrap_or_default(),
            features: self.features.clone(),
            values: self.values[start * w..end * w].to_vec(),
        }
    }
}

/// Result of selecting a contract's features.
#[derive(Debug, Clone)]
pub struct Selection {
    pub matrix: FeatureMatrix,
    /// Contract features absent from the rows; filled with zeros.
    pub substituted: Vec<String>,
    /// Expected-range violations, one message per feature.
    pub range_warnings: Vec<String>,
}

/// Select `contract.features` from `rows` in contract order.
///
/// Missing features become zero columns and are listed in `substituted`.
/// Nulls (which Silver output never carries) are read as zero.
pub fn select_features(symbol: &str, rows: &Frame, contract: &FeatureContract) -> Selection {
    let mut substituted = Vec::new();
    let mut range_warnings = Vec::new();
    let mut columns = Vec::with_capacity(contract.num_features());

    for feature in &contract.features {
        let values: Vec<f64> = match rows.column(feature) {
            Some(col) => col.iter().map(|v| v.unwrap_or(0.0)).collect(),
            None => {
                warn!(
                    symbol,
                    feature = feature.as_str(),
                    contract = %contract.id(),
                    "contract feature missing from silver rows; substituting zeros"
                );
                substituted.push(feature.clone());
                vec![0.0; rows.len()]
            }
        };
        if let Some(range) = contract.expected_ranges.get(feature) {
            let outside = values.iter().filter(|v| !range.contains(**v)).count();
            if outside > 0 {
                range_warnings.push(format!(
                    "{outside} value(s) of '{feature}' outside [{}, {}]",
                    range.min, range.max
                ));
            }
        }
        columns.push(values);
    }

    let mut matrix = FeatureMatrix::from_columns(contract.features.clone(), columns);
    matrix.dates = rows.dates().to_vec();
    if !range_warnings.is_empty() {
        warn!(symbol, contract = %contract.id(), warnings = ?range_warnings, "feature range check");
    }
    Selection {
        matrix,
        substituted,
        range_warnings,
    }
}
