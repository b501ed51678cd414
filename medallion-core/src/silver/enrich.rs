//! Indicator enrichment.
//!
//! Derived columns are appended in a fixed order. Warm-up rows are
//! forward-filled and then zero-filled; both passes only look backwards, so
//! the value at row t never depends on rows after t.

use super::clean::forward_fill;
use crate::config::SilverConfig;
use crate::error::{Result, SchemaError};
use crate::frame::{Frame, OHLCV_COLUMNS};
use crate::indicators::{
    Atr, Bollinger, BollingerBand, Indicator, Macd, MacdOutput, Momentum, PctChange, PriceSeries,
    Rsi, Volatility,
};

/// The indicator set configured by `config`, in output column order.
pub fn standard_indicators(config: &SilverConfig) -> Vec<Box<dyn Indicator>> {
    let (fast, slow, signal) = (config.macd_fast, config.macd_slow, config.macd_signal);
    let (bb_period, bb_mult) = (config.bollinger_period, config.bollinger_multiplier);

    let mut set: Vec<Box<dyn Indicator>> = vec![
        Box::new(PctChange::returns()),
        Box::new(Rsi::new(config.rsi_period)),
        Box::new(Macd::new(fast, slow, signal, MacdOutput::Line)),
        Box::new(Macd::new(fast, slow, signal, MacdOutput::Signal)),
        Box::new(Macd::new(fast, slow, signal, MacdOutput::Histogram)),
        Box::new(Volatility::new(config.volatility_period)),
        Box::new(PctChange::volume_change()),
    ];
    for &period in &config.momentum_periods {
        set.push(Box::new(Momentum::new(period)));
    }
    for band in [
        BollingerBand::Upper,
        BollingerBand::Middle,
        BollingerBand::Lower,
        BollingerBand::Width,
    ] {
        set.push(Box::new(Bollinger::new(bb_period, bb_mult, band)));
    }
    set.push(Box::new(Atr::new(config.atr_period)));
    set
}

/// Names of the columns [`enrich`] appends.
pub fn derived_columns(config: &SilverConfig) -> Vec<String> {
    standard_indicators(config)
        .iter()
        .map(|i| i.name().to_string())
        .collect()
}

/// Append every configured indicator to `rows`.
pub fn enrich(rows: &Frame, config: &SilverConfig) -> Result<Frame> {
    let prices = PriceSeries::from_frame(rows).ok_or_else(|| {
        let missing = OHLCV_COLUMNS
            .iter()
            .find(|c| !rows.has_column(c))
            .copied()
            .unwrap_or_default();
        SchemaError::MissingColumn(missing.to_string())
    })?;

    let mut out = rows.clone();
    for indicator in standard_indicators(config) {
        let raw = indicator.compute(&prices);
        let causal: Vec<Option<f64>> = raw
            .iter()
            .map(|&v| if v.is_finite() { Some(v) } else { None })
            .collect();
        let filled = forward_fill(&causal)
            .into_iter()
            .map(|v| Some(v.unwrap_or(0.0)))
            .collect();
        out.set_column(indicator.name(), filled)?;
    }
    Ok(out)
}
