//! Embedded SQLite catalog shared by the layer stores.
//!
//! Each layer owns one database file under its storage root. The connection
//! sits behind a mutex so stores are `Send + Sync`; every write runs inside a
//! single transaction so a crash never leaves a half-written record.

use crate::error::{Error, Result};
use chrono::{DateTime, NaiveDate, SecondsFormat, SubsecRound, Utc};
use rusqlite::{Connection, Transaction};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

pub const CATALOG_FILE: &str = "catalog.db";

pub struct Catalog {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl Catalog {
    /// Open (creating if needed) the catalog at `path` and apply `schema`.
    pub fn open(path: impl Into<PathBuf>, schema: &str) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(schema)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // A panic while holding the lock cannot leave an open transaction behind
        // (it rolls back on drop), so a poisoned connection is still usable.
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.lock();
        f(&conn)
    }

    pub fn write<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }
}

/// Current time at the microsecond precision timestamps are stored with.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

pub(crate) fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::CatalogRecord(format!("bad timestamp '{s}': {e}")))
}

pub(crate) fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub(crate) fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| Error::CatalogRecord(format!("bad date '{s}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS kv (k TEXT PRIMARY KEY, v INTEGER NOT NULL);";

    #[test]
    fn write_commits_and_failed_write_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(dir.path().join(CATALOG_FILE), SCHEMA).unwrap();

        catalog
            .write(|tx| {
                tx.execute("INSERT INTO kv (k, v) VALUES ('a', 1)", [])?;
                Ok(())
            })
            .unwrap();

        let failed: Result<()> = catalog.write(|tx| {
            tx.execute("INSERT INTO kv (k, v) VALUES ('b', 2)", [])?;
            Err(Error::Config("abort".into()))
        });
        assert!(failed.is_err());

        let count: i64 = catalog
            .read(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM kv", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn reopening_keeps_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/catalog.db");
        {
            let catalog = Catalog::open(&path, SCHEMA).unwrap();
            catalog
                .write(|tx| Ok(tx.execute("INSERT INTO kv (k, v) VALUES ('a', 1)", [])?))
                .unwrap();
        }
        let catalog = Catalog::open(&path, SCHEMA).unwrap();
        let v: i64 = catalog
            .read(|conn| Ok(conn.query_row("SELECT v FROM kv WHERE k = 'a'", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(v, 1);
    }

    #[test]
    fn timestamp_and_date_roundtrip() {
        let at = now();
        assert_eq!(parse_timestamp(&format_timestamp(at)).unwrap(), at);
        let date = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        assert_eq!(parse_date(&format_date(date)).unwrap(), date);
        assert!(parse_date("garbage").is_err());
    }
}
