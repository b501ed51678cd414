//! Percentage change: `x[t] / x[t-1] - 1`.
//!
//! Used for close-to-close returns and volume change. A zero or missing
//! previous value yields `NaN` rather than `inf`. Lookback: 1.

use super::{Indicator, PriceSeries};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PctChangeInput {
    Close,
    Volume,
}

#[derive(Debug, Clone)]
pub struct PctChange {
    input: PctChangeInput,
    name: String,
}

impl PctChange {
    pub fn returns() -> Self {
        Self {
            input: PctChangeInput::Close,
            name: "returns".to_string(),
        }
    }

    pub fn volume_change() -> Self {
        Self {
            input: PctChangeInput::Volume,
            name: "volume_change".to_string(),
        }
    }
}

pub fn pct_change(values: &[f64]) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    for i in 1..values.len() {
        let prev = values[i - 1];
        let curr = values[i];
        if prev.is_nan() || curr.is_nan() || prev == 0.0 {
            continue;
        }
        out[i] = curr / prev - 1.0;
    }
    out
}

impl Indicator for PctChange {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        1
    }

    fn compute(&self, prices: &PriceSeries) -> Vec<f64> {
        match self.input {
            PctChangeInput::Close => pct_change(&prices.close),
            PctChangeInput::Volume => pct_change(&prices.volume),
        }
    }
}
