//! Rolling volatility: sample standard deviation of close-to-close returns.
//! Lookback: period (one row for the first return, then a full window).

use super::returns::pct_change;
use super::{rolling_std, Indicator, PriceSeries};

#[derive(Debug, Clone)]
pub struct Volatility {
    period: usize,
    name: String,
}

impl Volatility {
    pub fn new(period: usize) -> Self {
        assert!(period >= 2, "Volatility period must be >= 2");
        Self {
            period,
            name: format!("volatility_{period}"),
        }
    }
}

impl Indicator for Volatility {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        self.period
    }

    fn compute(&self, prices: &PriceSeries) -> Vec<f64> {
        rolling_std(&pct_change(&prices.close), self.period, 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::{assert_approx, make_prices};

    #[test]
    fn constant_growth_has_zero_volatility() {
        let closes: Vec<f64> = (0..30).map(|i| 100.0 * 1.01f64.powi(i)).collect();
        let out = Volatility::new(20).compute(&make_prices(&closes));
        let first_valid = out.iter().position(|v| !v.is_nan()).unwrap();
        assert_eq!(first_valid, 20);
        assert_approx(out[29], 0.0, 1e-9);
    }

    #[test]
    fn alternating_returns_have_positive_volatility() {
        let closes = [100.0, 110.0, 100.0, 110.0, 100.0];
        let out = Volatility::new(2).compute(&make_prices(&closes));
        assert!(out[2] > 0.0);
        assert!(out[1].is_nan());
    }
}
