//! Batch and run identifiers.
//!
//! Ids read as `{layer}_{symbol}_{utc timestamp}_{digest}`. The digest is BLAKE3
//! over the layer, symbol, timestamp, caller-supplied content key, process id
//! and a process-wide sequence number, so two ids minted in the same
//! microsecond for the same content still differ.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Which layer (or the orchestrator) minted an id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdKind {
    Bronze,
    Silver,
    Gold,
    Run,
}

impl IdKind {
    pub fn prefix(self) -> &'static str {
        match self {
            IdKind::Bronze => "bronze",
            IdKind::Silver => "silver",
            IdKind::Gold => "gold",
            IdKind::Run => "run",
        }
    }
}

pub fn new_id(kind: IdKind, symbol: &str, at: DateTime<Utc>, content_key: &str) -> String {
    let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let mut hasher = blake3::Hasher::new();
    hasher.update(kind.prefix().as_bytes());
    hasher.update(symbol.as_bytes());
    hasher.update(&at.timestamp_micros().to_le_bytes());
    hasher.update(content_key.as_bytes());
    hasher.update(&std::process::id().to_le_bytes());
    hasher.update(&seq.to_le_bytes());
    let digest = hasher.finalize().to_hex();
    format!(
        "{}_{}_{}_{}",
        kind.prefix(),
        symbol,
        at.format("%Y%m%dT%H%M%S%6f"),
        &digest[..12]
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_for_identical_inputs() {
        let at = Utc::now();
        let a = new_id(IdKind::Bronze, "SPY", at, "abc");
        let b = new_id(IdKind::Bronze, "SPY", at, "abc");
        assert_ne!(a, b);
        assert!(a.starts_with("bronze_SPY_"));
    }

    #[test]
    fn id_embeds_timestamp() {
        let at = DateTime::parse_from_rfc3339("2024-03-05T10:11:12.123456Z")
            .unwrap()
            .with_timezone(&Utc);
        let id = new_id(IdKind::Gold, "QQQ", at, "");
        assert!(id.starts_with("gold_QQQ_20240305T101112123456_"));
    }
}
