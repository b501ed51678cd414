//! Moving Average Convergence Divergence.
//!
//! line      = EMA(close, fast) - EMA(close, slow)
//! signal    = EMA(line, signal_period)
//! histogram = line - signal
//! Lookback: slow - 1 for the line, slow + signal - 2 for signal/histogram.

use super::{ema_of_series, Indicator, PriceSeries};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacdOutput {
    Line,
    Signal,
    Histogram,
}

#[derive(Debug, Clone)]
pub struct Macd {
    fast: usize,
    slow: usize,
    signal: usize,
    output: MacdOutput,
    name: String,
}

impl Macd {
    pub fn new(fast: usize, slow: usize, signal: usize, output: MacdOutput) -> Self {
        assert!(fast >= 1 && slow > fast, "MACD requires 1 <= fast < slow");
        assert!(signal >= 1, "MACD signal period must be >= 1");
        let name = match output {
            MacdOutput::Line => "macd",
            MacdOutput::Signal => "macd_signal",
            MacdOutput::Histogram => "macd_hist",
        };
        Self {
            fast,
            slow,
            signal,
            output,
            name: name.to_string(),
        }
    }

    fn line(&self, closes: &[f64]) -> Vec<f64> {
        let fast = ema_of_series(closes, self.fast);
        let slow = ema_of_series(closes, self.slow);
        fast.iter().zip(&slow).map(|(f, s)| f - s).collect()
    }
}

impl Indicator for Macd {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        match self.output {
            MacdOutput::Line => self.slow - 1,
            MacdOutput::Signal | MacdOutput::Histogram => self.slow + self.signal - 2,
        }
    }

    fn compute(&self, prices: &PriceSeries) -> Vec<f64> {
        let line = self.line(&prices.close);
        if self.output == MacdOutput::Line {
            return line;
        }
        let signal = ema_of_series(&line, self.signal);
        match self.output {
            MacdOutput::Signal => signal,
            _ => line.iter().zip(&signal).map(|(l, s)| l - s).collect(),
        }
    }
}
