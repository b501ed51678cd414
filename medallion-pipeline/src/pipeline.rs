//! End-to-end orchestration: Bronze → Silver → Gold plus lineage.
//!
//! A `Pipeline` owns one handle per layer and the lineage log. It is built
//! explicitly from a config (or from already-open layers) and holds no global
//! state. Every entry point re-ingests its input into Bronze so the lineage
//! record always points at the exact raw rows that were used.

use std::time::Instant;

use medallion_core::catalog;
use medallion_core::ids::{new_id, IdKind};
use medallion_core::{
    BronzeBatch, BronzeStore, DataQualityReport, FeatureContract, Frame, GoldBatch, GoldBuilder,
    PipelineConfig, SilverOutput, SilverProcessor, Tensor3,
};
use rayon::prelude::*;
use tracing::{info, warn};

use crate::error::Result;
use crate::lineage::{LineageLog, PipelineLineage, RunKind};

/// Knobs for [`Pipeline::process_full`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessOptions {
    /// Fail at the Silver boundary when the raw quality verdict fails.
    pub strict: bool,
    /// Fit and persist normalization; otherwise load the current parameters.
    pub fit_normalization: bool,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            strict: false,
            fit_normalization: true,
        }
    }
}

/// Raw rows for one symbol in a training request.
#[derive(Debug, Clone)]
pub struct TrainingInput {
    pub symbol: String,
    pub source: String,
    pub rows: Frame,
}

/// Train and test tensors stacked across every symbol that had enough history.
#[derive(Debug, Clone)]
pub struct TrainingSet {
    pub train: Tensor3,
    pub test: Tensor3,
    /// One record per trained symbol, in input order.
    pub runs: Vec<PipelineLineage>,
    /// Symbols dropped for insufficient history.
    pub skipped: Vec<String>,
}

pub struct Pipeline {
    bronze: BronzeStore,
    silver: SilverProcessor,
    gold: GoldBuilder,
    lineage: LineageLog,
}

/// Output of the Bronze and Silver legs shared by every entry point.
struct Upstream {
    bronze: BronzeBatch,
    silver: SilverOutput,
}

impl Pipeline {
    pub fn new(
        bronze: BronzeStore,
        silver: SilverProcessor,
        gold: GoldBuilder,
        lineage: LineageLog,
    ) -> Self {
        Self {
            bronze,
            silver,
            gold,
            lineage,
        }
    }

    /// Open every layer under the configured roots and register the
    /// configured contracts.
    pub fn open(config: &PipelineConfig) -> Result<Self> {
        config.validate()?;
        let storage = &config.storage;
        let pipeline = Self::new(
            BronzeStore::open(&storage.bronze_root)?,
            SilverProcessor::open(&storage.silver_root, config.silver.clone())?,
            GoldBuilder::open(&storage.gold_root)?,
            LineageLog::open(&storage.lineage_path)?,
        );
        for contract in &config.contracts {
            pipeline.gold.register_contract(contract)?;
        }
        Ok(pipeline)
    }

    pub fn bronze(&self) -> &BronzeStore {
        &self.bronze
    }

    pub fn silver(&self) -> &SilverProcessor {
        &self.silver
    }

    pub fn gold(&self) -> &GoldBuilder {
        &self.gold
    }

    pub fn lineage_log(&self) -> &LineageLog {
        &self.lineage
    }

    /// Ingest, process to Silver, build a Gold batch over every row.
    pub fn process_full(
        &self,
        symbol: &str,
        rows: &Frame,
        source: &str,
        contract: &FeatureContract,
        options: ProcessOptions,
    ) -> Result<(Tensor3, PipelineLineage)> {
        let started = Instant::now();
        let upstream = self.upstream(symbol, rows, source, options.strict)?;
        let (tensor, gold) = self.gold.process(
            symbol,
            &upstream.silver.frame,
            &upstream.silver.batch.batch_id,
            contract,
            options.fit_normalization,
        )?;

        let record = self.record(RunKind::Full, &upstream, &gold, tensor.shape(), None, started);
        self.lineage.append(&record)?;
        info!(
            run_id = %record.run_id,
            symbol,
            shape = ?record.tensor_shape,
            latency_ms = record.latency_ms,
            "full run complete"
        );
        Ok((tensor, record))
    }

    /// Latest window for live prediction. Silver runs non-strict so one bad
    /// row cannot block a prediction. `None` when there is not yet a full
    /// window of history; no lineage is written in that case.
    pub fn get_inference_ready(
        &self,
        symbol: &str,
        rows: &Frame,
        source: &str,
        contract: &FeatureContract,
    ) -> Result<Option<(Tensor3, PipelineLineage)>> {
        let started = Instant::now();
        let upstream = self.upstream(symbol, rows, source, false)?;
        let Some((tensor, gold)) = self.gold.get_inference_batch(
            symbol,
            &upstream.silver.frame,
            Some(&upstream.silver.batch.batch_id),
            contract,
        )?
        else {
            info!(symbol, rows = rows.len(), needed = contract.sequence_length, "not enough history for inference");
            return Ok(None);
        };

        let record = self.record(RunKind::Inference, &upstream, &gold, tensor.shape(), None, started);
        self.lineage.append(&record)?;
        Ok(Some((tensor, record)))
    }

    /// Per-symbol ingest, Silver and leakage-free split, run in parallel.
    /// Symbols whose train partition is shorter than one window are skipped.
    ///
    /// Any other per-symbol failure fails the call with the first error in
    /// input order. Symbols run independently, so the others have already
    /// written their Bronze, Silver and Gold batches and lineage records by
    /// then. Those writes stay; the completed symbols are logged.
    pub fn get_training_ready(
        &self,
        inputs: &[TrainingInput],
        train_ratio: f64,
        contract: &FeatureContract,
        strict: bool,
    ) -> Result<TrainingSet> {
        let outcomes: Vec<Result<Option<(Tensor3, Tensor3, PipelineLineage)>>> = inputs
            .par_iter()
            .map(|input| self.train_symbol(input, train_ratio, contract, strict))
            .collect();

        let mut trains = Vec::new();
        let mut tests = Vec::new();
        let mut runs = Vec::new();
        let mut skipped = Vec::new();
        let mut failure = None;
        for (input, outcome) in inputs.iter().zip(outcomes) {
            match outcome {
                Ok(Some((train, test, record))) => {
                    trains.push(train);
                    tests.push(test);
                    runs.push(record);
                }
                Ok(None) => skipped.push(input.symbol.clone()),
                Err(err) => {
                    if failure.is_none() {
                        failure = Some((input.symbol.as_str(), err));
                    }
                }
            }
        }
        if let Some((symbol, err)) = failure {
            let completed: Vec<&str> = runs.iter().map(|r| r.symbol.as_str()).collect();
            warn!(
                symbol,
                error = %err,
                completed = ?completed,
                "training aborted; completed symbols keep their batches and lineage"
            );
            return Err(err);
        }

        let (steps, width) = (contract.sequence_length, contract.num_features());
        let stack = |parts: &[Tensor3]| -> Result<Tensor3> {
            if parts.is_empty() {
                Ok(Tensor3::empty(steps, width))
            } else {
                Ok(Tensor3::concat(parts)?)
            }
        };
        let set = TrainingSet {
            train: stack(&trains)?,
            test: stack(&tests)?,
            runs,
            skipped,
        };
        info!(
            symbols = set.runs.len(),
            skipped = set.skipped.len(),
            train = ?set.train.shape(),
            test = ?set.test.shape(),
            "training set ready"
        );
        Ok(set)
    }

    /// Dry-run quality assessment. Nothing is persisted.
    pub fn validate_data(&self, symbol: &str, rows: &Frame) -> Result<DataQualityReport> {
        rows.validate_ohlcv().map_err(medallion_core::Error::from)?;
        Ok(self.silver.assess(symbol, "dry-run", rows))
    }

    /// Rebuild a Silver batch from a stored Bronze batch with the current
    /// Silver settings.
    pub fn reprocess_silver(&self, bronze_batch_id: &str, strict: bool) -> Result<SilverOutput> {
        let (rows, bronze) = self.bronze.get_batch(bronze_batch_id)?;
        Ok(self
            .silver
            .process(&bronze.symbol, &rows, &bronze.batch_id, strict)?)
    }

    pub fn lineage(&self, run_id: &str) -> Result<Option<PipelineLineage>> {
        self.lineage.find(run_id)
    }

    pub fn lineage_for_symbol(&self, symbol: &str) -> Result<Vec<PipelineLineage>> {
        self.lineage.for_symbol(symbol)
    }

    fn upstream(&self, symbol: &str, rows: &Frame, source: &str, strict: bool) -> Result<Upstream> {
        let bronze = self.bronze.ingest(symbol, rows, source)?;
        let silver = self.silver.process(symbol, rows, &bronze.batch_id, strict)?;
        Ok(Upstream { bronze, silver })
    }

    fn train_symbol(
        &self,
        input: &TrainingInput,
        train_ratio: f64,
        contract: &FeatureContract,
        strict: bool,
    ) -> Result<Option<(Tensor3, Tensor3, PipelineLineage)>> {
        let started = Instant::now();
        let symbol = input.symbol.as_str();
        let upstream = self.upstream(symbol, &input.rows, &input.source, strict)?;
        let split = self.gold.get_training_split_from(
            symbol,
            &upstream.silver.frame,
            Some(&upstream.silver.batch.batch_id),
            train_ratio,
            contract,
        );
        let (train, test, gold) = match split {
            Ok(parts) => parts,
            Err(e) if e.is_insufficient_data() => {
                warn!(symbol, error = %e, "skipping symbol for training");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let record = self.record(
            RunKind::Training,
            &upstream,
            &gold,
            train.shape(),
            Some(test.shape()),
            started,
        );
        self.lineage.append(&record)?;
        Ok(Some((train, test, record)))
    }

    fn record(
        &self,
        kind: RunKind,
        upstream: &Upstream,
        gold: &GoldBatch,
        tensor_shape: [usize; 3],
        test_shape: Option<[usize; 3]>,
        started: Instant,
    ) -> PipelineLineage {
        let created_at = catalog::now();
        let mut issues = upstream.silver.report.issues.clone();
        if !upstream.silver.report.passed {
            issues.push("raw quality verdict failed; processed without the strict gate".into());
        }
        issues.extend(
            gold.substituted_features
                .iter()
                .map(|f| format!("feature '{f}' missing from Silver rows; substituted with zeros")),
        );
        issues.extend(gold.range_warnings.iter().cloned());

        PipelineLineage {
            run_id: new_id(IdKind::Run, &gold.symbol, created_at, &gold.batch_id),
            kind,
            symbol: gold.symbol.clone(),
            source: upstream.bronze.source.clone(),
            bronze_batch_id: upstream.bronze.batch_id.clone(),
            silver_batch_id: upstream.silver.batch.batch_id.clone(),
            gold_batch_id: gold.batch_id.clone(),
            bronze_rows: upstream.bronze.row_count,
            silver_rows: upstream.silver.batch.row_count,
            quality_score: upstream.silver.batch.quality_score,
            tensor_shape,
            test_shape,
            contract: gold.contract_id(),
            normalization_version: gold.normalization_version,
            substituted_features: gold.substituted_features.clone(),
            latency_ms: started.elapsed().as_millis() as u64,
            issues,
            created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SyntheticSource;
    use chrono::NaiveDate;
    use medallion_core::contract::NormalizationMethod;
    use medallion_core::{Error, ParamVersion};
    use tempfile::TempDir;

    fn pipeline() -> (TempDir, Pipeline) {
        let dir = TempDir::new().unwrap();
        let pipeline = Pipeline::open(&PipelineConfig::rooted_at(dir.path())).unwrap();
        (dir, pipeline)
    }

    fn bars(symbol: &str, count: usize) -> Frame {
        SyntheticSource::default().generate(symbol, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), count)
    }

    fn small_contract() -> FeatureContract {
        FeatureContract::new(
            "small",
            "1",
            vec!["close".into(), "returns".into(), "rsi_14".into()],
            10,
            NormalizationMethod::Zscore,
        )
    }

    #[test]
    fn full_run_links_all_three_layers() {
        let (_dir, p) = pipeline();
        let (tensor, record) = p
            .process_full("SPY", &bars("SPY", 40), "synthetic", &small_contract(), ProcessOptions::default())
            .unwrap();
        assert_eq!(tensor.shape(), [31, 10, 3]);
        assert_eq!(record.kind, RunKind::Full);
        assert_eq!(record.bronze_rows, 40);
        assert_eq!(record.normalization_version, 1);

        let (_, bronze) = p.bronze().get_batch(&record.bronze_batch_id).unwrap();
        let (_, silver) = p.silver().get_batch(&record.silver_batch_id).unwrap();
        assert_eq!(silver.bronze_batch_id, bronze.batch_id);
        let gold = p.gold().load_batch(&record.gold_batch_id).unwrap();
        assert_eq!(gold.batch.silver_batch_id.as_deref(), Some(silver.batch_id.as_str()));

        assert_eq!(p.lineage(&record.run_id).unwrap(), Some(record));
    }

    #[test]
    fn full_run_propagates_insufficient_data() {
        let (_dir, p) = pipeline();
        let err = p
            .process_full("SPY", &bars("SPY", 5), "synthetic", &small_contract(), ProcessOptions::default())
            .unwrap_err();
        assert!(err.is_insufficient_data());
        assert!(p.lineage_for_symbol("SPY").unwrap().is_empty());
    }

    #[test]
    fn inference_requires_training_first() {
        let (_dir, p) = pipeline();
        let contract = small_contract();
        let err = p
            .get_inference_ready("SPY", &bars("SPY", 30), "synthetic", &contract)
            .unwrap_err();
        assert!(matches!(
            err,
            crate::PipelineError::Core(Error::MissingNormalization { .. })
        ));

        p.get_training_ready(
            &[TrainingInput {
                symbol: "SPY".into(),
                source: "synthetic".into(),
                rows: bars("SPY", 60),
            }],
            0.8,
            &contract,
            false,
        )
        .unwrap();

        assert!(p
            .get_inference_ready("SPY", &bars("SPY", 9), "synthetic", &contract)
            .unwrap()
            .is_none());
        let (tensor, record) = p
            .get_inference_ready("SPY", &bars("SPY", 30), "synthetic", &contract)
            .unwrap()
            .unwrap();
        assert_eq!(tensor.shape(), [1, 10, 3]);
        assert_eq!(record.kind, RunKind::Inference);
        assert_eq!(p.lineage_for_symbol("SPY").unwrap().len(), 2);
    }

    #[test]
    fn training_skips_short_symbols_and_stacks_the_rest() {
        let (_dir, p) = pipeline();
        let inputs: Vec<TrainingInput> = [("AAA", 60), ("BBB", 8), ("CCC", 50)]
            .into_iter()
            .map(|(s, n)| TrainingInput {
                symbol: s.into(),
                source: "synthetic".into(),
                rows: bars(s, n),
            })
            .collect();

        let set = p.get_training_ready(&inputs, 0.8, &small_contract(), false).unwrap();
        assert_eq!(set.skipped, vec!["BBB"]);
        assert_eq!(set.runs.len(), 2);
        // AAA: 48 train rows -> 39 windows, 12 test rows -> 3; CCC: 40 -> 31, 10 -> 1
        assert_eq!(set.train.shape(), [39 + 31, 10, 3]);
        assert_eq!(set.test.shape(), [3 + 1, 10, 3]);
        assert_eq!(set.runs[0].symbol, "AAA");
        assert_eq!(set.runs[0].test_shape, Some([3, 10, 3]));
    }

    #[test]
    fn training_with_nothing_usable_is_empty_not_an_error() {
        let (_dir, p) = pipeline();
        let inputs = vec![TrainingInput {
            symbol: "TINY".into(),
            source: "synthetic".into(),
            rows: bars("TINY", 6),
        }];
        let set = p.get_training_ready(&inputs, 0.8, &small_contract(), false).unwrap();
        assert_eq!(set.train.shape(), [0, 10, 3]);
        assert_eq!(set.skipped, vec!["TINY"]);
    }

    #[test]
    fn strict_training_stops_on_bad_quality() {
        let (_dir, p) = pipeline();
        let mut rows = bars("SPY", 60);
        let mut close: Vec<Option<f64>> = rows.column("close").unwrap().to_vec();
        for v in close.iter_mut().take(20) {
            *v = None;
        }
        rows.set_column("close", close).unwrap();
        let inputs = vec![TrainingInput {
            symbol: "SPY".into(),
            source: "synthetic".into(),
            rows,
        }];

        let err = p.get_training_ready(&inputs, 0.8, &small_contract(), true).unwrap_err();
        assert!(matches!(err, crate::PipelineError::Core(Error::QualityGate { .. })));
        // non-strict carries the failure into lineage instead
        let set = p.get_training_ready(&inputs, 0.8, &small_contract(), false).unwrap();
        assert!(set.runs[0].issues.iter().any(|i| i.contains("strict")));
    }

    #[test]
    fn one_failed_symbol_keeps_the_others_written() {
        let (_dir, p) = pipeline();
        let mut broken = bars("BAD", 60);
        let mut close: Vec<Option<f64>> = broken.column("close").unwrap().to_vec();
        for v in close.iter_mut().take(20) {
            *v = None;
        }
        broken.set_column("close", close).unwrap();
        let inputs = vec![
            TrainingInput {
                symbol: "GOOD".into(),
                source: "synthetic".into(),
                rows: bars("GOOD", 60),
            },
            TrainingInput {
                symbol: "BAD".into(),
                source: "synthetic".into(),
                rows: broken,
            },
        ];

        let err = p.get_training_ready(&inputs, 0.8, &small_contract(), true).unwrap_err();
        assert!(matches!(err, crate::PipelineError::Core(Error::QualityGate { ref symbol, .. }) if symbol == "BAD"));

        let good = p.lineage_for_symbol("GOOD").unwrap();
        assert_eq!(good.len(), 1);
        assert_eq!(good[0].kind, RunKind::Training);
        assert_eq!(p.gold().list_batches("GOOD").unwrap().len(), 1);
        assert!(p.lineage_for_symbol("BAD").unwrap().is_empty());
        assert_eq!(p.bronze().list_batches("BAD", None).unwrap().len(), 1);
    }

    #[test]
    fn validate_data_persists_nothing() {
        let (_dir, p) = pipeline();
        let report = p.validate_data("SPY", &bars("SPY", 20)).unwrap();
        assert!(report.passed);
        assert!(p.bronze().list_batches("SPY", None).unwrap().is_empty());

        let no_close = Frame::new(bars("SPY", 3).dates().to_vec());
        assert!(p.validate_data("SPY", &no_close).is_err());
    }

    #[test]
    fn reprocess_silver_adds_a_batch_for_the_same_bronze() {
        let (_dir, p) = pipeline();
        let (_, record) = p
            .process_full("SPY", &bars("SPY", 40), "synthetic", &small_contract(), ProcessOptions::default())
            .unwrap();
        let again = p.reprocess_silver(&record.bronze_batch_id, false).unwrap();
        assert_ne!(again.batch.batch_id, record.silver_batch_id);
        assert_eq!(again.batch.bronze_batch_id, record.bronze_batch_id);
        assert_eq!(p.silver().list_batches_for_bronze(&record.bronze_batch_id).unwrap().len(), 2);
    }

    #[test]
    fn process_without_fit_reuses_current_parameters() {
        let (_dir, p) = pipeline();
        let contract = small_contract();
        let fit = ProcessOptions::default();
        let reuse = ProcessOptions {
            fit_normalization: false,
            ..fit
        };
        p.process_full("SPY", &bars("SPY", 40), "synthetic", &contract, fit).unwrap();
        let (_, record) = p.process_full("SPY", &bars("SPY", 45), "synthetic", &contract, reuse).unwrap();
        assert_eq!(record.normalization_version, 1);
        let history = p.gold().normalization_history("SPY", &contract.id()).unwrap();
        assert_eq!(history.len(), 1);
        assert!(p.gold().normalization("SPY", &contract.id(), ParamVersion::Current).unwrap().is_some());
    }

    #[test]
    fn configured_contracts_are_registered_on_open() {
        let dir = TempDir::new().unwrap();
        let mut config = PipelineConfig::rooted_at(dir.path());
        config.contracts.push(small_contract());
        let p = Pipeline::open(&config).unwrap();
        assert_eq!(p.gold().contract(&small_contract().id()).unwrap(), Some(small_contract()));
    }
}
