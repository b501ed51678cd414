use chrono::{Datelike, Days, NaiveDate, Weekday};
use medallion_pipeline::{MarketDataSource, SyntheticSource};
use proptest::prelude::*;

fn arb_date() -> impl Strategy<Value = NaiveDate> {
    (0u64..3650).prop_map(|offset| NaiveDate::from_ymd_opt(2015, 1, 1).unwrap() + Days::new(offset))
}

fn arb_symbol() -> impl Strategy<Value = String> {
    "[A-Z]{1,5}"
}

// ── Synthetic source ──

proptest! {
    #[test]
    fn generated_bars_are_valid_raw_input(
        symbol in arb_symbol(),
        start in arb_date(),
        count in 1usize..300,
    ) {
        let frame = SyntheticSource::default().generate(&symbol, start, count);
        prop_assert_eq!(frame.len(), count);
        prop_assert!(frame.validate_ohlcv().is_ok());
        prop_assert_eq!(frame.null_cells(), 0);
        prop_assert_eq!(frame.duplicate_dates(), 0);
        prop_assert!(frame
            .dates()
            .iter()
            .all(|d| !matches!(d.weekday(), Weekday::Sat | Weekday::Sun)));
    }

    #[test]
    fn fetch_stays_inside_the_range(
        symbol in arb_symbol(),
        start in arb_date(),
        span in 3u64..60,
    ) {
        let end = start + Days::new(span);
        let frame = SyntheticSource::default().fetch(&symbol, start, end).unwrap();
        prop_assert!(frame.first_date().unwrap() >= start);
        prop_assert!(frame.last_date().unwrap() <= end);
    }

    #[test]
    fn same_symbol_same_walk(symbol in arb_symbol(), start in arb_date()) {
        let source = SyntheticSource::default();
        prop_assert_eq!(
            source.generate(&symbol, start, 40).content_hash(),
            source.generate(&symbol, start, 40).content_hash()
        );
    }
}
