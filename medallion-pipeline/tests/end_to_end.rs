//! End-to-end scenarios over a fresh storage root.

use chrono::NaiveDate;
use medallion_core::gold::{select_features, NormalizationParams};
use medallion_core::{FeatureContract, Frame, ParamVersion, PipelineConfig};
use medallion_pipeline::{
    Pipeline, ProcessOptions, RunKind, SyntheticSource, TrainingInput,
};
use tempfile::TempDir;

fn open_pipeline() -> (TempDir, Pipeline) {
    let dir = TempDir::new().unwrap();
    let pipeline = Pipeline::open(&PipelineConfig::rooted_at(dir.path())).unwrap();
    (dir, pipeline)
}

fn demo_bars(count: usize) -> Frame {
    SyntheticSource::default().generate("DEMO", NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), count)
}

fn with_null_close(mut rows: Frame, at: usize) -> Frame {
    let mut close = rows.column("close").unwrap().to_vec();
    close[at] = None;
    rows.set_column("close", close).unwrap();
    rows
}

// ── DEMO full run ──

#[test]
fn demo_full_run_with_one_null_close() {
    let (_dir, p) = open_pipeline();
    let contract = FeatureContract::standard("demo", 60);
    let rows = with_null_close(demo_bars(120), 70);

    let (tensor, record) = p
        .process_full("DEMO", &rows, "synthetic", &contract, ProcessOptions::default())
        .unwrap();

    // Bronze keeps the raw rows, null included
    let (bronze_rows, bronze) = p.bronze().get_batch(&record.bronze_batch_id).unwrap();
    assert_eq!(bronze.row_count, 120);
    assert_eq!(bronze_rows.column("close").unwrap()[70], None);

    // Silver cleaned the null and scored the result
    let (silver_rows, silver) = p.silver().get_batch(&record.silver_batch_id).unwrap();
    assert!(silver.quality_score > 0.0);
    assert_eq!(silver_rows.null_cells(), 0);
    assert!(silver_rows.column("close").unwrap()[70].is_some());

    // Gold windows every row
    assert_eq!(tensor.shape(), [61, 60, contract.num_features()]);
    assert!(tensor.as_slice().iter().all(|v| v.is_finite()));

    // Lineage ties the three together and remembers the null
    assert_eq!(record.kind, RunKind::Full);
    assert_eq!(
        record.batch_ids(),
        [
            bronze.batch_id.as_str(),
            silver.batch_id.as_str(),
            p.gold().load_batch(&record.gold_batch_id).unwrap().batch.batch_id.as_str(),
        ]
    );
    assert!(record
        .issues
        .iter()
        .any(|issue| issue.contains("null") && issue.contains("close")));
    assert_eq!(p.lineage_for_symbol("DEMO").unwrap(), vec![record]);
}

#[test]
fn demo_rerun_reingests_identical_content() {
    let (_dir, p) = open_pipeline();
    let contract = FeatureContract::standard("demo", 60);
    let rows = demo_bars(120);
    let options = ProcessOptions::default();

    let (_, first) = p.process_full("DEMO", &rows, "synthetic", &contract, options).unwrap();
    let (_, second) = p.process_full("DEMO", &rows, "synthetic", &contract, options).unwrap();

    assert_ne!(first.bronze_batch_id, second.bronze_batch_id);
    let batches = p.bronze().list_batches("DEMO", None).unwrap();
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0].checksum, batches[1].checksum);
    // merge-on-read collapses the duplicate history
    let history = p.bronze().get_historical("DEMO", None, None, None).unwrap();
    assert_eq!(history, rows);
    assert_eq!(second.normalization_version, 2);
}

// ── Training then inference ──

#[test]
fn inference_reuses_training_normalization() {
    let (_dir, p) = open_pipeline();
    let contract = FeatureContract::standard("demo", 60);
    let rows = demo_bars(150);

    let set = p
        .get_training_ready(
            &[TrainingInput {
                symbol: "DEMO".into(),
                source: "synthetic".into(),
                rows: rows.clone(),
            }],
            0.8,
            &contract,
            true,
        )
        .unwrap();
    assert!(set.skipped.is_empty());
    // 120 train rows -> 61 windows, 30 test rows < 60 -> empty test tensor
    assert_eq!(set.train.shape(), [61, 60, contract.num_features()]);
    assert_eq!(set.test.samples(), 0);

    let stored = p
        .gold()
        .normalization("DEMO", &contract.id(), ParamVersion::Current)
        .unwrap()
        .unwrap();

    // fit on the train partition alone
    let (train_silver, _) = p.silver().get_batch(&set.runs[0].silver_batch_id).unwrap();
    let train_matrix = select_features("DEMO", &train_silver, &contract).matrix.slice(0, 120);
    assert_eq!(
        stored.params,
        NormalizationParams::fit(contract.normalization, &train_matrix)
    );

    // inference on the tail applies exactly those parameters
    let tail = rows.tail(80);
    let (tensor, record) = p
        .get_inference_ready("DEMO", &tail, "synthetic", &contract)
        .unwrap()
        .unwrap();
    assert_eq!(tensor.shape(), [1, 60, contract.num_features()]);
    assert_eq!(record.normalization_version, stored.version);

    let (tail_silver, _) = p.silver().get_batch(&record.silver_batch_id).unwrap();
    let expected = stored
        .params
        .apply(&select_features("DEMO", &tail_silver.tail(60), &contract).matrix)
        .unwrap();
    assert_eq!(tensor.as_slice(), expected.values());

    let kinds: Vec<RunKind> = p
        .lineage_for_symbol("DEMO")
        .unwrap()
        .into_iter()
        .map(|r| r.kind)
        .collect();
    assert_eq!(kinds, vec![RunKind::Training, RunKind::Inference]);
}

#[test]
fn symbols_train_independently_in_parallel() {
    let (_dir, p) = open_pipeline();
    let contract = FeatureContract::standard("demo", 20);
    let source = SyntheticSource::default();
    let start = NaiveDate::from_ymd_opt(2023, 6, 1).unwrap();
    let inputs: Vec<TrainingInput> = ["AAA", "BBB", "CCC", "DDD"]
        .iter()
        .map(|s| TrainingInput {
            symbol: s.to_string(),
            source: "synthetic".into(),
            rows: source.generate(s, start, 100),
        })
        .collect();

    let set = p.get_training_ready(&inputs, 0.75, &contract, false).unwrap();
    // 75 train rows -> 56 windows, 25 test rows -> 6, per symbol
    assert_eq!(set.train.samples(), 4 * 56);
    assert_eq!(set.test.samples(), 4 * 6);
    let symbols: Vec<&str> = set.runs.iter().map(|r| r.symbol.as_str()).collect();
    assert_eq!(symbols, vec!["AAA", "BBB", "CCC", "DDD"]);
    for symbol in ["AAA", "BBB", "CCC", "DDD"] {
        let history = p.gold().normalization_history(symbol, &contract.id()).unwrap();
        assert_eq!(history.len(), 1, "{symbol}");
    }
    assert_eq!(p.lineage_log().read_all().unwrap().len(), 4);
}
