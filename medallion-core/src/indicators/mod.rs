//! Causal indicator implementations used by Silver enrichment.
//!
//! Every indicator implements [`Indicator`]: dense price series in, one output
//! series of the same length out, `NaN` during warm-up. Multi-output
//! indicators (MACD, Bollinger) are exposed as separate named instances per
//! output, keeping the single-series trait unchanged.
//!
//! # Look-ahead contamination guard
//! No value at row t may depend on rows after t. Every indicator must give
//! identical output on a truncated series and on the full series.

pub mod atr;
pub mod bollinger;
pub mod ema;
pub mod macd;
pub mod momentum;
pub mod returns;
pub mod rsi;
pub mod volatility;

pub use atr::Atr;
pub use bollinger::{Bollinger, BollingerBand};
pub use ema::ema_of_series;
pub use macd::{Macd, MacdOutput};
pub use momentum::Momentum;
pub use returns::{PctChange, PctChangeInput};
pub use rsi::Rsi;
pub use volatility::Volatility;

use crate::frame::{Frame, CLOSE, HIGH, LOW, OPEN, VOLUME};

/// Dense OHLCV view of a frame. Nulls are `NaN`.
#[derive(Debug, Clone, Default)]
pub struct PriceSeries {
    pub open: Vec<f64>,
    pub high: Vec<f64>,
    pub low: Vec<f64>,
    pub close: Vec<f64>,
    pub volume: Vec<f64>,
}

impl PriceSeries {
    /// `None` if the frame lacks any OHLCV column.
    pub fn from_frame(frame: &Frame) -> Option<Self> {
        Some(Self {
            open: frame.series(OPEN)?,
            high: frame.series(HIGH)?,
            low: frame.series(LOW)?,
            close: frame.series(CLOSE)?,
            volume: frame.series(VOLUME)?,
        })
    }

    pub fn len(&self) -> usize {
        self.close.len()
    }

    pub fn is_empty(&self) -> bool {
        self.close.is_empty()
    }

    /// First `n` rows, for truncated-series checks.
    pub fn truncate(&self, n: usize) -> Self {
        let n = n.min(self.len());
        Self {
            open: self.open[..n].to_vec(),
            high: self.high[..n].to_vec(),
            low: self.low[..n].to_vec(),
            close: self.close[..n].to_vec(),
            volume: self.volume[..n].to_vec(),
        }
    }
}

pub trait Indicator: Send + Sync {
    /// Output column name (e.g. "rsi_14", "bb_upper").
    fn name(&self) -> &str;

    /// Rows needed before the indicator produces valid output.
    fn lookback(&self) -> usize;

    fn compute(&self, prices: &PriceSeries) -> Vec<f64>;
}

/// Trailing mean over `period` values; `NaN` until the window is full or
/// while it contains a `NaN`.
pub fn rolling_mean(values: &[f64], period: usize) -> Vec<f64> {
    let n = values.len();
    let mut out = vec![f64::NAN; n];
    if period == 0 {
        return out;
    }
    for i in (period.saturating_sub(1))..n {
        let window = &values[i + 1 - period..=i];
        if window.iter().any(|v| v.is_nan()) {
            continue;
        }
        out[i] = window.iter().sum::<f64>() / period as f64;
    }
    out
}

/// Trailing standard deviation with `ddof` delta degrees of freedom
/// (0 = population, 1 = sample).
pub fn rolling_std(values: &[f64], period: usize, ddof: usize) -> Vec<f64> {
    let n = values.len();
    let mut out = vec![f64::NAN; n];
    if period <= ddof {
        return out;
    }
    for i in (period - 1)..n {
        let window = &values[i + 1 - period..=i];
        if window.iter().any(|v| v.is_nan()) {
            continue;
        }
        let mean = window.iter().sum::<f64>() / period as f64;
        let ss: f64 = window.iter().map(|v| (v - mean).powi(2)).sum();
        out[i] = (ss / (period - ddof) as f64).sqrt();
    }
    out
}

/// Build prices from closes for testing.
///
/// open = prev close (or close for the first row), high = max(open, close) + 1,
/// low = min(open, close) - 1, volume = 1000.
#[cfg(test)]
pub fn make_prices(closes: &[f64]) -> PriceSeries {
    let open: Vec<f64> = closes
        .iter()
        .enumerate()
        .map(|(i, &c)| if i == 0 { c } else { closes[i - 1] })
        .collect();
    PriceSeries {
        high: open.iter().zip(closes).map(|(o, c)| o.max(*c) + 1.0).collect(),
        low: open.iter().zip(closes).map(|(o, c)| o.min(*c) - 1.0).collect(),
        volume: vec![1000.0; closes.len()],
        close: closes.to_vec(),
        open,
    }
}

#[cfg(test)]
pub fn assert_approx(actual: f64, expected: f64, epsilon: f64) {
    assert!(
        (actual - expected).abs() < epsilon,
        "assert_approx failed: actual={actual}, expected={expected}, diff={}, epsilon={epsilon}",
        (actual - expected).abs()
    );
}

#[cfg(test)]
pub const DEFAULT_EPSILON: f64 = 1e-10;
