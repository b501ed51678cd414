//! File helpers shared by the layer stores.
//!
//! Writes are atomic (write to `.tmp`, rename into place). Immutable writes
//! refuse to replace an existing file and leave the result read-only.

use crate::error::{Error, Result};
use polars::prelude::*;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Whether a write may replace an existing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Immutable,
    Replace,
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn prepare(path: &Path, mode: WriteMode) -> Result<PathBuf> {
    if mode == WriteMode::Immutable && path.exists() {
        return Err(Error::AlreadyExists(path.display().to_string()));
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(tmp_path(path))
}

fn commit(tmp: &Path, path: &Path, mode: WriteMode) -> Result<()> {
    fs::rename(tmp, path).map_err(|e| {
        let _ = fs::remove_file(tmp);
        Error::Io(e)
    })?;
    if mode == WriteMode::Immutable {
        let mut perms = fs::metadata(path)?.permissions();
        perms.set_readonly(true);
        fs::set_permissions(path, perms)?;
    }
    Ok(())
}

/// Write a DataFrame to a parquet file.
pub fn write_parquet(df: &DataFrame, path: &Path, mode: WriteMode) -> Result<()> {
    let tmp = prepare(path, mode)?;
    let file = fs::File::create(&tmp)?;
    ParquetWriter::new(file)
        .finish(&mut df.clone())
        .map_err(|e| {
            let _ = fs::remove_file(&tmp);
            Error::Parquet(format!("write {}: {e}", path.display()))
        })?;
    commit(&tmp, path, mode)
}

/// Read a parquet file into a DataFrame.
pub fn read_parquet(path: &Path) -> Result<DataFrame> {
    let file = fs::File::open(path)?;
    ParquetReader::new(file)
        .finish()
        .map_err(|e| Error::Parquet(format!("read {}: {e}", path.display())))
}

/// Pretty-printed JSON sidecar.
pub fn write_json<T: Serialize>(value: &T, path: &Path, mode: WriteMode) -> Result<()> {
    let tmp = prepare(path, mode)?;
    let json = serde_json::to_string_pretty(value)?;
    fs::write(&tmp, json)?;
    commit(&tmp, path, mode)
}

/// Remove a file whose catalog record was never committed. Clears the
/// read-only bit first so immutable writes can be undone.
pub(crate) fn discard(path: &Path) {
    if let Ok(meta) = fs::metadata(path) {
        let mut perms = meta.permissions();
        perms.set_readonly(false);
        let _ = fs::set_permissions(path, perms);
    }
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "could not remove orphaned file");
        }
    }
}

/// Reject names that would escape their partition directory.
pub(crate) fn check_name(kind: &'static str, value: &str) -> Result<()> {
    let bad = value.trim().is_empty()
        || value.contains('/')
        || value.contains('\\')
        || value.contains("..")
        || value.contains('=');
    if bad {
        return Err(crate::error::SchemaError::InvalidName {
            kind,
            value: value.to_string(),
        }
        .into());
    }
    Ok(())
}
