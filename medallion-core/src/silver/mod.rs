//! Silver layer: quality assessment, cleaning and indicator enrichment.
//!
//! `process` runs assess, gate, clean, enrich, re-assess and persist, in
//! that order. Each run writes a new feature file; many Silver batches may
//! point at the same Bronze batch.

mod batch;
pub mod clean;
pub mod enrich;
pub mod quality;

pub use batch::SilverBatch;
pub use quality::{
    assess, DataQualityReport, OhlcViolation, OhlcViolationKind, QualityStage,
};

use crate::catalog::{self, Catalog, CATALOG_FILE};
use crate::config::SilverConfig;
use crate::error::{Error, IntegrityFault, Result, SchemaError};
use crate::frame::{Frame, OHLCV_COLUMNS};
use crate::ids::{new_id, IdKind};
use crate::storage::{self, check_name, WriteMode};
use rusqlite::params;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Everything one Silver run produces.
#[derive(Debug, Clone)]
pub struct SilverOutput {
    /// Cleaned rows with every derived column appended.
    pub frame: Frame,
    pub batch: SilverBatch,
    /// Assessment of the raw input.
    pub report: DataQualityReport,
    /// Assessment of the enriched output; its completeness is the batch score.
    pub cleaned_report: DataQualityReport,
}

pub struct SilverProcessor {
    root: PathBuf,
    catalog: Catalog,
    config: SilverConfig,
}

impl SilverProcessor {
    pub fn open(root: impl Into<PathBuf>, config: SilverConfig) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        let catalog = Catalog::open(root.join(CATALOG_FILE), batch::SCHEMA)?;
        Ok(Self {
            root,
            catalog,
            config,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &SilverConfig {
        &self.config
    }

    pub fn batch_path(&self, batch: &SilverBatch) -> PathBuf {
        self.root.join(&batch.file_path)
    }

    /// Raw-stage quality assessment. Pure; nothing is persisted.
    pub fn assess(&self, symbol: &str, batch_id: &str, rows: &Frame) -> DataQualityReport {
        quality::assess(symbol, batch_id, rows, QualityStage::Raw, &self.config)
    }

    pub fn process(
        &self,
        symbol: &str,
        rows: &Frame,
        bronze_batch_id: &str,
        strict: bool,
    ) -> Result<SilverOutput> {
        check_name("symbol", symbol)?;
        if let Some(missing) = OHLCV_COLUMNS.iter().find(|c| !rows.has_column(c)) {
            return Err(SchemaError::MissingColumn(missing.to_string()).into());
        }
        if rows.is_empty() {
            return Err(SchemaError::Empty.into());
        }

        let created_at = catalog::now();
        let batch_id = new_id(IdKind::Silver, symbol, created_at, bronze_batch_id);

        let report = self.assess(symbol, &batch_id, rows);
        if !report.passed {
            if strict {
                return Err(Error::QualityGate {
                    symbol: symbol.to_string(),
                    issues: report.issues.clone(),
                });
            }
            warn!(
                symbol,
                bronze_batch_id,
                issues = ?report.issues,
                "quality gate failed; continuing in non-strict mode"
            );
        }

        let cleaned = clean::clean(rows, &self.config)?;
        let frame = enrich::enrich(&cleaned, &self.config)?;
        let cleaned_report =
            quality::assess(symbol, &batch_id, &frame, QualityStage::Cleaned, &self.config);

        let (start_date, end_date) = match (frame.first_date(), frame.last_date()) {
            (Some(first), Some(last)) => (first, last),
            _ => return Err(SchemaError::Empty.into()),
        };
        let file_path = PathBuf::from("features")
            .join(format!("symbol={symbol}"))
            .join(format!("{batch_id}.parquet"));
        storage::write_parquet(
            &frame.to_dataframe()?,
            &self.root.join(&file_path),
            WriteMode::Immutable,
        )?;

        let batch = SilverBatch {
            batch_id,
            symbol: symbol.to_string(),
            bronze_batch_id: bronze_batch_id.to_string(),
            row_count: frame.len(),
            feature_columns: frame.column_names(),
            start_date,
            end_date,
            quality_score: cleaned_report.quality_score(),
            checksum: frame.content_hash(),
            created_at,
            file_path,
        };
        let recorded = self.catalog.write(|tx| {
            batch::insert(tx, &batch)?;
            batch::insert_report(tx, &report)?;
            batch::insert_report(tx, &cleaned_report)
        });
        if let Err(err) = recorded {
            storage::discard(&self.batch_path(&batch));
            return Err(err);
        }

        info!(
            symbol,
            batch_id = %batch.batch_id,
            bronze_batch_id,
            rows = batch.row_count,
            quality = batch.quality_score,
            raw_completeness = report.completeness_pct,
            "silver batch written"
        );
        Ok(SilverOutput {
            frame,
            batch,
            report,
            cleaned_report,
        })
    }

    /// Newest readable Silver batch for the symbol.
    pub fn get_latest(&self, symbol: &str) -> Result<Option<(Frame, SilverBatch)>> {
        let batches = self.query("symbol = ?1", symbol)?;
        for batch in batches.into_iter().rev() {
            match self.load_verified(&batch) {
                Ok(frame) => return Ok(Some((frame, batch))),
                Err(fault) => warn!(batch_id = %batch.batch_id, %fault, "silver batch unavailable"),
            }
        }
        Ok(None)
    }

    pub fn get_batch(&self, batch_id: &str) -> Result<(Frame, SilverBatch)> {
        let batch = self
            .query("batch_id = ?1", batch_id)?
            .pop()
            .ok_or_else(|| Error::BatchNotFound(batch_id.to_string()))?;
        let frame = self.load_verified(&batch)?;
        Ok((frame, batch))
    }

    /// Every Silver batch derived from one Bronze batch, oldest first.
    pub fn list_batches_for_bronze(&self, bronze_batch_id: &str) -> Result<Vec<SilverBatch>> {
        self.query("bronze_batch_id = ?1", bronze_batch_id)
    }

    /// Stored reports for a Silver batch, raw before cleaned.
    pub fn get_reports(&self, batch_id: &str) -> Result<Vec<DataQualityReport>> {
        let rows: Vec<(String, String)> = self.catalog.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT stage, report FROM quality_reports WHERE batch_id = ?1 \
                 ORDER BY CASE stage WHEN 'raw' THEN 0 ELSE 1 END",
            )?;
            let rows = stmt.query_map(params![batch_id], |r| Ok((r.get(0)?, r.get(1)?)))?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })?;
        rows.iter()
            .map(|(stage, json)| batch::decode_report(stage, json))
            .collect()
    }

    fn query(&self, predicate: &str, value: &str) -> Result<Vec<SilverBatch>> {
        let sql = format!(
            "SELECT {} FROM silver_batches WHERE {predicate} ORDER BY created_at_us, rowid",
            batch::SELECT_COLUMNS
        );
        let rows = self.catalog.read(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![value], batch::read_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })?;
        debug!(predicate, value, found = rows.len(), "silver catalog lookup");
        rows.into_iter().map(SilverBatch::try_from).collect()
    }

    fn load_verified(&self, batch: &SilverBatch) -> std::result::Result<Frame, IntegrityFault> {
        let path = self.batch_path(batch);
        if !path.exists() {
            return Err(IntegrityFault::MissingFile {
                batch_id: batch.batch_id.clone(),
                path: path.display().to_string(),
            });
        }
        let unreadable = |e: Error| IntegrityFault::Unreadable {
            batch_id: batch.batch_id.clone(),
            reason: e.to_string(),
        };
        let frame = storage::read_parquet(&path)
            .and_then(|df| Frame::from_dataframe(&df))
            .map_err(unreadable)?;
        let computed = frame.content_hash();
        if computed != batch.checksum {
            return Err(IntegrityFault::ChecksumMismatch {
                batch_id: batch.batch_id.clone(),
                stored: batch.checksum.clone(),
                computed,
            });
        }
        Ok(frame)
    }
}
