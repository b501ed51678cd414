//! Lineage log — JSONL append-only audit trail, one record per pipeline run.
//!
//! Each record ties an output tensor back to the Bronze, Silver and Gold
//! batches that produced it. Records are never rewritten: the file is opened
//! in append mode and a run id can only be written once. Known run ids are
//! read once when the log is opened and tracked in memory after that.

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use medallion_core::contract::ContractId;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunKind {
    Full,
    Inference,
    Training,
}

impl RunKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RunKind::Full => "full",
            RunKind::Inference => "inference",
            RunKind::Training => "training",
        }
    }
}

/// One end-to-end run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineLineage {
    pub run_id: String,
    pub kind: RunKind,
    pub symbol: String,
    pub source: String,
    pub bronze_batch_id: String,
    pub silver_batch_id: String,
    /// Inference batches are ephemeral; their id is recorded here only.
    pub gold_batch_id: String,
    pub bronze_rows: usize,
    pub silver_rows: usize,
    pub quality_score: f64,
    /// Training runs record the train tensor here and the test tensor below.
    pub tensor_shape: [usize; 3],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_shape: Option<[usize; 3]>,
    pub contract: ContractId,
    pub normalization_version: u32,
    #[serde(default)]
    pub substituted_features: Vec<String>,
    pub latency_ms: u64,
    /// Non-fatal issues met along the way.
    #[serde(default)]
    pub issues: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl PipelineLineage {
    pub fn batch_ids(&self) -> [&str; 3] {
        [
            &self.bronze_batch_id,
            &self.silver_batch_id,
            &self.gold_batch_id,
        ]
    }
}

/// JSONL lineage file.
pub struct LineageLog {
    path: PathBuf,
    /// Run ids already in the file. Held across the duplicate check and the
    /// append so both happen as one step within this process.
    run_ids: Mutex<HashSet<String>>,
}

impl LineageLog {
    /// Open (and create the parent directory of) the log at `path` and load
    /// the run ids it already holds. The file itself is created on first
    /// append.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| PipelineError::LineageIo {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let log = Self {
            path,
            run_ids: Mutex::new(HashSet::new()),
        };
        let known: HashSet<String> = log.read_all()?.into_iter().map(|r| r.run_id).collect();
        debug!(path = %log.path.display(), runs = known.len(), "lineage log opened");
        *log.lock_run_ids() = known;
        Ok(log)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `record`. A run id already present in the log is rejected.
    pub fn append(&self, record: &PipelineLineage) -> Result<()> {
        let json = serde_json::to_string(record)?;
        let mut run_ids = self.lock_run_ids();
        if run_ids.contains(&record.run_id) {
            return Err(PipelineError::DuplicateRun(record.run_id.clone()));
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| self.io_error(source))?;
        writeln!(file, "{json}").map_err(|source| self.io_error(source))?;
        file.flush().map_err(|source| self.io_error(source))?;
        run_ids.insert(record.run_id.clone());

        debug!(run_id = %record.run_id, kind = record.kind.as_str(), "lineage appended");
        Ok(())
    }

    /// Every readable record in append order. Malformed lines are skipped.
    pub fn read_all(&self) -> Result<Vec<PipelineLineage>> {
        let file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(self.io_error(source)),
        };

        let mut records = Vec::new();
        for (number, line) in io::BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|source| self.io_error(source))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<PipelineLineage>(&line) {
                Ok(record) => records.push(record),
                Err(e) => warn!(
                    path = %self.path.display(),
                    line = number + 1,
                    error = %e,
                    "skipping malformed lineage line"
                ),
            }
        }
        Ok(records)
    }

    pub fn find(&self, run_id: &str) -> Result<Option<PipelineLineage>> {
        Ok(self.read_all()?.into_iter().find(|r| r.run_id == run_id))
    }

    /// Records for `symbol`, oldest first.
    pub fn for_symbol(&self, symbol: &str) -> Result<Vec<PipelineLineage>> {
        Ok(self
            .read_all()?
            .into_iter()
            .filter(|r| r.symbol == symbol)
            .collect())
    }

    fn lock_run_ids(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.run_ids
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn io_error(&self, source: io::Error) -> PipelineError {
        PipelineError::LineageIo {
            path: self.path.clone(),
            source,
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────
