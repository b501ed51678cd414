//! Bollinger Bands: moving average +/- standard deviation multiplier.
//!
//! Four outputs (separate Indicator instances):
//! - Middle: SMA(close, period)
//! - Upper: middle + mult * stddev(close, period)
//! - Lower: middle - mult * stddev(close, period)
//! - Width: (upper - lower) / middle, `NaN` when middle is zero
//!
//! Uses population stddev (divide by N).
//! Lookback: period - 1.

use super::{rolling_mean, rolling_std, Indicator, PriceSeries};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BollingerBand {
    Upper,
    Middle,
    Lower,
    Width,
}

#[derive(Debug, Clone)]
pub struct Bollinger {
    period: usize,
    multiplier: f64,
    band: BollingerBand,
    name: String,
}

impl Bollinger {
    pub fn new(period: usize, multiplier: f64, band: BollingerBand) -> Self {
        assert!(period >= 1, "Bollinger period must be >= 1");
        let name = match band {
            BollingerBand::Upper => "bb_upper",
            BollingerBand::Middle => "bb_middle",
            BollingerBand::Lower => "bb_lower",
            BollingerBand::Width => "bb_width",
        };
        Self {
            period,
            multiplier,
            band,
            name: name.to_string(),
        }
    }
}

impl Indicator for Bollinger {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        self.period - 1
    }

    fn compute(&self, prices: &PriceSeries) -> Vec<f64> {
        let middle = rolling_mean(&prices.close, self.period);
        if self.band == BollingerBand::Middle {
            return middle;
        }
        let std = rolling_std(&prices.close, self.period, 0);
        middle
            .iter()
            .zip(&std)
            .map(|(&m, &s)| {
                let upper = m + self.multiplier * s;
                let lower = m - self.multiplier * s;
                match self.band {
                    BollingerBand::Upper => upper,
                    BollingerBand::Lower => lower,
                    BollingerBand::Width if m != 0.0 => (upper - lower) / m,
                    _ => f64::NAN,
                }
            })
            .collect()
    }
}
