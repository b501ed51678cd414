//! Criterion benchmarks for the per-batch hot paths.
//!
//! Benchmarks:
//! 1. Content checksum over a raw batch
//! 2. Silver stages (assess, clean, enrich)
//! 3. Gold transforms (feature selection, normalization fit/apply, windowing)

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use medallion_core::contract::FeatureContract;
use medallion_core::frame::{Bar, Frame};
use medallion_core::gold::sequence::windows;
use medallion_core::gold::{select_features, NormalizationParams};
use medallion_core::silver::clean::clean;
use medallion_core::silver::enrich::enrich;
use medallion_core::silver::{assess, QualityStage};
use medallion_core::SilverConfig;

// ── Helpers ──────────────────────────────────────────────────────────

fn make_bars(n: usize) -> Vec<Bar> {
    let base_date = chrono::NaiveDate::from_ymd_opt(2020, 1, 2).unwrap();
    (0..n)
        .map(|i| {
            let close = 100.0 + (i as f64 * 0.1).sin() * 10.0;
            Bar {
                date: base_date + chrono::Duration::days(i as i64),
                open: close - 0.3,
                high: close + 1.5,
                low: close - 1.5,
                close,
                volume: 1_000_000.0 + (i % 500) as f64 * 1_000.0,
            }
        })
        .collect()
}

fn make_frame(n: usize) -> Frame {
    Frame::from_bars(&make_bars(n))
}

// ── 1. Checksum ──────────────────────────────────────────────────────

fn bench_checksum(c: &mut Criterion) {
    let mut group = c.benchmark_group("content_hash");
    for &rows in &[252, 2520] {
        let frame = make_frame(rows);
        group.bench_with_input(BenchmarkId::from_parameter(rows), &rows, |b, _| {
            b.iter(|| black_box(&frame).content_hash());
        });
    }
    group.finish();
}

// ── 2. Silver ────────────────────────────────────────────────────────

fn bench_silver(c: &mut Criterion) {
    let mut group = c.benchmark_group("silver");
    let config = SilverConfig::default();

    for &rows in &[252, 1260, 2520] {
        let frame = make_frame(rows);
        group.bench_with_input(BenchmarkId::new("assess", rows), &rows, |b, _| {
            b.iter(|| assess("BENCH", "bench", black_box(&frame), QualityStage::Raw, &config));
        });
        group.bench_with_input(BenchmarkId::new("clean", rows), &rows, |b, _| {
            b.iter(|| clean(black_box(&frame), &config));
        });
        group.bench_with_input(BenchmarkId::new("enrich", rows), &rows, |b, _| {
            b.iter(|| enrich(black_box(&frame), &config));
        });
    }

    group.finish();
}

// ── 3. Gold ──────────────────────────────────────────────────────────

fn bench_gold(c: &mut Criterion) {
    let mut group = c.benchmark_group("gold");
    let config = SilverConfig::default();
    let contract = FeatureContract::standard("bench", 60);
    let enriched = enrich(&make_frame(1260), &config).unwrap();
    let matrix = select_features("BENCH", &enriched, &contract).matrix;
    let params = NormalizationParams::fit(contract.normalization, &matrix);

    group.bench_function("select_1260_rows", |b| {
        b.iter(|| select_features("BENCH", black_box(&enriched), &contract));
    });
    group.bench_function("fit_1260_rows", |b| {
        b.iter(|| NormalizationParams::fit(contract.normalization, black_box(&matrix)));
    });
    group.bench_function("apply_1260_rows", |b| {
        b.iter(|| params.apply(black_box(&matrix)));
    });
    group.bench_function("windows_1260_rows_len_60", |b| {
        b.iter(|| windows(black_box(&matrix), 60));
    });

    group.finish();
}

criterion_group!(benches, bench_checksum, bench_silver, bench_gold);
criterion_main!(benches);
