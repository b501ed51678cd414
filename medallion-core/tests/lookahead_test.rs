//! Look-ahead contamination tests for every derived Silver column.
//!
//! No derived value at row t may depend on rows after t. Each indicator is
//! computed on a truncated series (rows 0..100) and on the full series
//! (rows 0..200); the shared prefix must match exactly. A price shock placed
//! after the cut must not move any earlier value either.

use chrono::NaiveDate;
use medallion_core::frame::{Bar, Frame};
use medallion_core::indicators::{Indicator, PriceSeries};
use medallion_core::silver::enrich::{derived_columns, enrich, standard_indicators};
use medallion_core::SilverConfig;

fn make_test_bars(n: usize) -> Vec<Bar> {
    let base_date = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
    let mut price = 100.0;
    (0..n)
        .map(|i| {
            // deterministic LCG walk
            let seed = (i as u64).wrapping_mul(6364136223846793005).wrapping_add(1);
            price = (price + ((seed % 200) as f64 - 100.0) * 0.05).max(10.0);
            let open = price - 0.5;
            let close = price + 0.3;
            Bar {
                date: base_date + chrono::Duration::days(i as i64),
                open,
                high: open.max(close) + 2.0,
                low: open.min(close) - 2.0,
                close,
                volume: 1000.0 + i as f64 * 100.0,
            }
        })
        .collect()
}

fn assert_no_lookahead(indicator: &dyn Indicator, full: &PriceSeries, truncated_len: usize) {
    let full_result = indicator.compute(full);
    let truncated_result = indicator.compute(&full.truncate(truncated_len));
    assert_eq!(truncated_result.len(), truncated_len, "{}", indicator.name());
    assert_eq!(full_result.len(), full.len(), "{}", indicator.name());

    for i in 0..truncated_len {
        let (t, f) = (truncated_result[i], full_result[i]);
        if t.is_nan() && f.is_nan() {
            continue;
        }
        assert!(
            (t - f).abs() < 1e-12,
            "{}: look-ahead at row {i} (truncated={t}, full={f})",
            indicator.name()
        );
    }
}

#[test]
fn every_indicator_is_causal() {
    let frame = Frame::from_bars(&make_test_bars(200));
    let prices = PriceSeries::from_frame(&frame).unwrap();
    for indicator in standard_indicators(&SilverConfig::default()) {
        for cut in [1, 2, 25, 100, 199] {
            assert_no_lookahead(indicator.as_ref(), &prices, cut);
        }
    }
}

#[test]
fn future_shock_does_not_move_the_past() {
    let config = SilverConfig::default();
    let calm = make_test_bars(200);
    let mut shocked = calm.clone();
    for bar in &mut shocked[150..] {
        bar.open *= 3.0;
        bar.high *= 3.0;
        bar.low *= 3.0;
        bar.close *= 3.0;
        bar.volume *= 10.0;
    }

    let a = enrich(&Frame::from_bars(&calm), &config).unwrap();
    let b = enrich(&Frame::from_bars(&shocked), &config).unwrap();
    for name in derived_columns(&config) {
        let (ca, cb) = (a.column(&name).unwrap(), b.column(&name).unwrap());
        assert_eq!(ca[..150], cb[..150], "{name} changed before the shock");
        assert_ne!(ca[150..], cb[150..], "{name} ignored the shock");
    }
}

#[test]
fn short_history_still_emits_every_row() {
    let config = SilverConfig::default();
    let enriched = enrich(&Frame::from_bars(&make_test_bars(5)), &config).unwrap();
    assert_eq!(enriched.len(), 5);
    assert_eq!(enriched.null_cells(), 0);
    for name in derived_columns(&config) {
        assert!(enriched.has_column(&name), "{name}");
    }
}
