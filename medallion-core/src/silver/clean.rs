//! Cleaning: dedupe, sort, gap-fill, clip, clamp.

use crate::config::SilverConfig;
use crate::error::Result;
use crate::frame::{Frame, PRICE_COLUMNS, VOLUME};

/// Carry the last seen value forward over nulls.
pub(crate) fn forward_fill(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let mut last = None;
    values
        .iter()
        .map(|v| {
            if v.is_some() {
                last = *v;
            }
            last
        })
        .collect()
}

/// Fill leading nulls from the first value that follows them.
pub(crate) fn backward_fill(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let mut out = values.to_vec();
    let mut next = None;
    for v in out.iter_mut().rev() {
        match v {
            Some(_) => next = *v,
            None => *v = next,
        }
    }
    out
}

/// Clip to `mean +/- sigma * std` (sample std over the finite values).
///
/// Left unchanged when the bounds are not finite, which happens when prints
/// near `f64::MAX` overflow the moments.
fn clip_sigma(values: &[Option<f64>], sigma: f64) -> Vec<Option<f64>> {
    let present: Vec<f64> = values.iter().flatten().copied().filter(|v| v.is_finite()).collect();
    if present.len() < 2 {
        return values.to_vec();
    }
    let n = present.len() as f64;
    let mean = present.iter().sum::<f64>() / n;
    let std = (present.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt();
    let (lower, upper) = (mean - sigma * std, mean + sigma * std);
    if !lower.is_finite() || !upper.is_finite() || lower > upper {
        return values.to_vec();
    }
    values.iter().map(|v| v.map(|x| x.clamp(lower, upper))).collect()
}

/// Produce a clean copy of raw OHLCV rows.
///
/// Duplicate dates keep the last row, rows are sorted, every column is
/// forward- then back-filled (zero if a column is entirely null), OHLC values
/// are clipped to `clip_sigma` standard deviations and volume is clamped to be
/// non-negative.
pub fn clean(rows: &Frame, config: &SilverConfig) -> Result<Frame> {
    let mut out = rows.dedup_keep_last_sorted();
    for name in out.column_names() {
        let Some(values) = out.column(&name) else {
            continue;
        };
        let values: Vec<Option<f64>> = values.iter().map(|v| v.filter(|x| x.is_finite())).collect();
        let mut filled: Vec<Option<f64>> = backward_fill(&forward_fill(&values))
            .into_iter()
            .map(|v| Some(v.unwrap_or(0.0)))
            .collect();
        if PRICE_COLUMNS.contains(&name.as_str()) {
            filled = clip_sigma(&filled, config.clip_sigma);
        } else if name == VOLUME {
            filled = filled.into_iter().map(|v| v.map(|x| x.max(0.0))).collect();
        }
        out.set_column(name, filled)?;
    }
    Ok(out)
}
