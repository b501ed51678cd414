//! Momentum as a rate of change: close[t] / close[t - period] - 1.
//! Lookback: period. A zero base price yields `NaN`.

use super::{Indicator, PriceSeries};

#[derive(Debug, Clone)]
pub struct Momentum {
    period: usize,
    name: String,
}

impl Momentum {
    pub fn new(period: usize) -> Self {
        assert!(period >= 1, "Momentum period must be >= 1");
        Self {
            period,
            name: format!("momentum_{period}"),
        }
    }
}

impl Indicator for Momentum {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        self.period
    }

    fn compute(&self, prices: &PriceSeries) -> Vec<f64> {
        let closes = &prices.close;
        let mut out = vec![f64::NAN; closes.len()];
        for i in self.period..closes.len() {
            let base = closes[i - self.period];
            if base != 0.0 {
                out[i] = closes[i] / base - 1.0;
            }
        }
        out
    }
}
