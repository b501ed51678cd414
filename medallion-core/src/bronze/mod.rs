//! Bronze layer: immutable, checksummed landing zone for raw OHLCV batches.
//!
//! Every ingestion writes a new read-only parquet file and one catalog row.
//! Nothing is ever rewritten; history is reconstructed at read time by
//! concatenating batches in ingestion order and keeping the last value per date.

mod batch;

pub use batch::{BronzeBatch, IntegrityStatus, SCHEMA_VERSION};

use crate::catalog::{self, Catalog, CATALOG_FILE};
use crate::error::{Error, IntegrityFault, Result};
use crate::frame::Frame;
use crate::ids::{new_id, IdKind};
use crate::storage::{self, check_name, WriteMode};
use chrono::NaiveDate;
use rusqlite::params;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

pub struct BronzeStore {
    root: PathBuf,
    catalog: Catalog,
}

impl BronzeStore {
    /// Open the store rooted at `root`, creating directories and the catalog.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        let catalog = Catalog::open(root.join(CATALOG_FILE), batch::SCHEMA)?;
        Ok(Self { root, catalog })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of a batch's backing file.
    pub fn batch_path(&self, batch: &BronzeBatch) -> PathBuf {
        self.root.join(&batch.file_path)
    }

    /// Land a raw batch. Schema problems are rejected before anything is written.
    pub fn ingest(&self, symbol: &str, rows: &Frame, source: &str) -> Result<BronzeBatch> {
        check_name("symbol", symbol)?;
        check_name("source", source)?;
        rows.validate_ohlcv()?;

        let (start_date, end_date) = match (rows.first_date(), rows.last_date()) {
            (Some(first), Some(last)) => (first, last),
            _ => return Err(crate::error::SchemaError::Empty.into()),
        };

        let checksum = rows.content_hash();
        let ingested_at = catalog::now();
        let batch_id = new_id(IdKind::Bronze, symbol, ingested_at, &checksum);
        let file_path = PathBuf::from(format!("source={source}"))
            .join(format!("symbol={symbol}"))
            .join(format!(
                "{}_{batch_id}.parquet",
                ingested_at.format("%Y%m%dT%H%M%S%6f")
            ));

        storage::write_parquet(
            &rows.to_dataframe()?,
            &self.root.join(&file_path),
            WriteMode::Immutable,
        )?;

        let batch = BronzeBatch {
            batch_id,
            symbol: symbol.to_string(),
            source: source.to_string(),
            ingested_at,
            row_count: rows.len(),
            checksum,
            schema_version: SCHEMA_VERSION,
            file_path,
            start_date,
            end_date,
        };
        if let Err(err) = self.catalog.write(|tx| batch::insert(tx, &batch)) {
            storage::discard(&self.root.join(&batch.file_path));
            return Err(err);
        }

        info!(
            symbol,
            source,
            batch_id = %batch.batch_id,
            rows = batch.row_count,
            "bronze batch ingested"
        );
        Ok(batch)
    }

    /// Newest batch for the symbol that passes integrity verification.
    pub fn get_latest(
        &self,
        symbol: &str,
        source: Option<&str>,
    ) -> Result<Option<(Frame, BronzeBatch)>> {
        for batch in self.query(symbol, source, true)? {
            match self.load_verified(&batch) {
                Ok(frame) => return Ok(Some((frame, batch))),
                Err(fault) => report_fault(&fault),
            }
        }
        debug!(symbol, ?source, "no readable bronze batch");
        Ok(None)
    }

    /// Merge every readable batch for the symbol, last-ingested value winning
    /// per date, then filter to `[start, end]`.
    pub fn get_historical(
        &self,
        symbol: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
        source: Option<&str>,
    ) -> Result<Frame> {
        let batches = self.query(symbol, source, false)?;
        let mut frames = Vec::with_capacity(batches.len());
        for batch in &batches {
            match self.load_verified(batch) {
                Ok(frame) => frames.push(frame),
                Err(fault) => report_fault(&fault),
            }
        }
        debug!(
            symbol,
            batches = batches.len(),
            readable = frames.len(),
            "bronze merge-on-read"
        );
        Ok(Frame::concat(&frames)
            .dedup_keep_last_sorted()
            .filter_dates(start, end))
    }

    /// Direct lookup. Unlike the history reads, integrity faults are errors here.
    pub fn get_batch(&self, batch_id: &str) -> Result<(Frame, BronzeBatch)> {
        let batch = self.find(batch_id)?;
        let frame = self.load_verified(&batch)?;
        Ok((frame, batch))
    }

    /// Cataloged batches for the symbol, oldest first.
    pub fn list_batches(&self, symbol: &str, source: Option<&str>) -> Result<Vec<BronzeBatch>> {
        self.query(symbol, source, false)
    }

    /// Re-hash a batch's backing file against its catalog record.
    pub fn verify(&self, batch_id: &str) -> Result<IntegrityStatus> {
        let batch = self.find(batch_id)?;
        Ok(match self.load_verified(&batch) {
            Ok(_) => IntegrityStatus::Verified,
            Err(fault) => IntegrityStatus::Faulted(fault),
        })
    }

    fn find(&self, batch_id: &str) -> Result<BronzeBatch> {
        let sql = format!(
            "SELECT {} FROM bronze_batches WHERE batch_id = ?1",
            batch::SELECT_COLUMNS
        );
        let row = self.catalog.read(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query_map(params![batch_id], batch::read_row)?;
            Ok(rows.next().transpose()?)
        })?;
        match row {
            Some(row) => BronzeBatch::try_from(row),
            None => Err(Error::BatchNotFound(batch_id.to_string())),
        }
    }

    fn query(
        &self,
        symbol: &str,
        source: Option<&str>,
        newest_first: bool,
    ) -> Result<Vec<BronzeBatch>> {
        let order = if newest_first { "DESC" } else { "ASC" };
        let sql = format!(
            "SELECT {} FROM bronze_batches \
             WHERE symbol = ?1 AND (?2 IS NULL OR source = ?2) \
             ORDER BY ingested_at_us {order}, rowid {order}",
            batch::SELECT_COLUMNS
        );
        let rows = self.catalog.read(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![symbol, source], batch::read_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })?;
        rows.into_iter().map(BronzeBatch::try_from).collect()
    }

    fn load_verified(&self, batch: &BronzeBatch) -> std::result::Result<Frame, IntegrityFault> {
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
        let df = storage::read_parquet(&path).map_err(unreadable)?;
        let frame = Frame::from_dataframe(&df).map_err(unreadable)?;

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

fn report_fault(fault: &IntegrityFault) {
    match fault {
        IntegrityFault::ChecksumMismatch { batch_id, .. } => {
            error!(%batch_id, %fault, "bronze batch is corrupt; treating as unavailable")
        }
        IntegrityFault::MissingFile { batch_id, .. }
        | IntegrityFault::Unreadable { batch_id, .. } => {
            warn!(%batch_id, %fault, "bronze batch unavailable")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SchemaError;
    use crate::frame::test_support::{parquet_files, sample_bars, sample_frame};
    use crate::frame::{CLOSE, VOLUME};

    fn store() -> (tempfile::TempDir, BronzeStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = BronzeStore::open(dir.path().join("bronze")).unwrap();
        (dir, store)
    }

    fn catalog_rows(store: &BronzeStore) -> i64 {
        store
            .catalog
            .read(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM bronze_batches", [], |r| r.get(0))?))
            .unwrap()
    }

    #[test]
    fn ingest_then_get_latest_roundtrips() {
        let (_dir, store) = store();
        let rows = sample_frame(30);
        let batch = store.ingest("SPY", &rows, "yahoo").unwrap();

        assert_eq!(batch.row_count, 30);
        assert_eq!(batch.checksum, rows.content_hash());
        assert!(store.batch_path(&batch).exists());
        assert!(batch
            .file_path
            .starts_with(Path::new("source=yahoo").join("symbol=SPY")));

        let (latest, meta) = store.get_latest("SPY", None).unwrap().unwrap();
        assert_eq!(latest, rows);
        assert_eq!(meta, batch);
        assert!(store.get_latest("QQQ", None).unwrap().is_none());
    }

    #[test]
    fn schema_errors_write_nothing() {
        let (_dir, store) = store();
        let frame = Frame::new(sample_frame(3).dates().to_vec())
            .with_column(CLOSE, vec![Some(1.0); 3])
            .unwrap();
        let err = store.ingest("SPY", &frame, "csv").unwrap_err();
        assert!(matches!(err, Error::Schema(SchemaError::MissingColumn(_))));

        let reversed: Vec<_> = sample_bars(5).into_iter().rev().collect();
        let err = store.ingest("SPY", &Frame::from_bars(&reversed), "csv").unwrap_err();
        assert!(matches!(err, Error::Schema(SchemaError::NotTimeOrdered { .. })));

        assert!(store.ingest("../SPY", &sample_frame(3), "csv").is_err());
        assert_eq!(catalog_rows(&store), 0);
        assert!(!store.root().join("source=csv").exists());
    }

    #[test]
    fn historical_merges_last_write_wins() {
        let (_dir, store) = store();
        let full = sample_frame(20);
        store.ingest("SPY", &full.slice(0, 12), "yahoo").unwrap();

        let mut correction = full.slice(10, 20);
        let mut close = correction.column(CLOSE).unwrap().to_vec();
        close[0] = Some(999.0);
        correction.set_column(CLOSE, close).unwrap();
        store.ingest("SPY", &correction, "yahoo").unwrap();

        let merged = store.get_historical("SPY", None, None, None).unwrap();
        assert_eq!(merged.len(), 20);
        assert_eq!(merged.duplicate_dates(), 0);
        assert_eq!(merged.column(CLOSE).unwrap()[10], Some(999.0));
        assert_eq!(merged.column(CLOSE).unwrap()[9], full.column(CLOSE).unwrap()[9]);

        let window = store
            .get_historical("SPY", Some(full.dates()[5]), Some(full.dates()[7]), None)
            .unwrap();
        assert_eq!(window.dates(), &full.dates()[5..=7]);
    }

    #[test]
    fn source_filter_applies() {
        let (_dir, store) = store();
        store.ingest("SPY", &sample_frame(5), "yahoo").unwrap();
        let csv = store.ingest("SPY", &sample_frame(7), "csv").unwrap();

        let (_, latest) = store.get_latest("SPY", None).unwrap().unwrap();
        assert_eq!(latest.batch_id, csv.batch_id);
        let (frame, _) = store.get_latest("SPY", Some("yahoo")).unwrap().unwrap();
        assert_eq!(frame.len(), 5);
        assert_eq!(store.list_batches("SPY", None).unwrap().len(), 2);
        assert_eq!(store.list_batches("SPY", Some("csv")).unwrap().len(), 1);
    }

    #[test]
    fn missing_file_is_skipped() {
        let (_dir, store) = store();
        let older = store.ingest("SPY", &sample_frame(5), "yahoo").unwrap();
        let newer = store.ingest("SPY", &sample_frame(8), "yahoo").unwrap();
        std::fs::remove_file(store.batch_path(&newer)).unwrap();

        let (_, latest) = store.get_latest("SPY", None).unwrap().unwrap();
        assert_eq!(latest.batch_id, older.batch_id);
        assert!(matches!(
            store.verify(&newer.batch_id).unwrap(),
            IntegrityStatus::Faulted(IntegrityFault::MissingFile { .. })
        ));
        assert!(matches!(
            store.get_batch(&newer.batch_id).unwrap_err(),
            Error::Integrity(IntegrityFault::MissingFile { .. })
        ));
    }

    #[test]
    fn checksum_mismatch_is_detected() {
        let (_dir, store) = store();
        let rows = sample_frame(10);
        let batch = store.ingest("SPY", &rows, "yahoo").unwrap();
        assert!(store.verify(&batch.batch_id).unwrap().is_verified());

        let mut tampered = rows.clone();
        let mut volume = tampered.column(VOLUME).unwrap().to_vec();
        volume[3] = Some(1.0);
        tampered.set_column(VOLUME, volume).unwrap();
        storage::write_parquet(
            &tampered.to_dataframe().unwrap(),
            &store.batch_path(&batch),
            WriteMode::Replace,
        )
        .unwrap();

        let status = store.verify(&batch.batch_id).unwrap();
        assert!(matches!(
            status,
            IntegrityStatus::Faulted(IntegrityFault::ChecksumMismatch { .. })
        ));
        // status reports are handed out by value
        assert_eq!(status.clone(), status);
        assert!(store.get_latest("SPY", None).unwrap().is_none());
        assert!(store.get_historical("SPY", None, None, None).unwrap().is_empty());
    }

    #[test]
    fn unknown_batch_is_not_found() {
        let (_dir, store) = store();
        assert!(matches!(
            store.verify("bronze_nope").unwrap_err(),
            Error::BatchNotFound(_)
        ));
    }

    #[test]
    fn catalog_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let batch = {
            let store = BronzeStore::open(dir.path()).unwrap();
            store.ingest("SPY", &sample_frame(4), "yahoo").unwrap()
        };
        let store = BronzeStore::open(dir.path()).unwrap();
        let (_, again) = store.get_batch(&batch.batch_id).unwrap();
        assert_eq!(again, batch);
    }

    #[test]
    fn failed_catalog_write_leaves_no_file() {
        let (_dir, store) = store();
        store
            .catalog
            .write(|tx| Ok(tx.execute_batch("DROP TABLE bronze_batches")?))
            .unwrap();

        let err = store.ingest("SPY", &sample_frame(10), "csv").unwrap_err();
        assert!(matches!(err, Error::Catalog(_)), "{err}");
        assert_eq!(parquet_files(store.root()), 0);
    }
}
