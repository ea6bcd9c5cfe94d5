use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

/// One processed event. `record_hash` covers the JCS form of the record
/// with an empty `record_hash`; `prev_hash` links to the previous line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JournalRecord {
    pub journal_id: String,
    pub event_key: String,
    pub actor: String,
    pub command: String,
    pub disposition: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settled_units: Option<i64>,
    pub ts: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev_hash: Option<String>,
    pub record_hash: String,
}

impl JournalRecord {
    pub fn new(event_key: &str, actor: &str, command: &str, disposition: &str) -> Self {
        Self {
            journal_id: format!("jr_{}", uuid::Uuid::new_v4().as_simple()),
            event_key: event_key.to_string(),
            actor: actor.to_string(),
            command: command.to_string(),
            disposition: disposition.to_string(),
            delivery: None,
            settled_units: None,
            ts: Utc::now().to_rfc3339(),
            prev_hash: None,
            record_hash: String::new(),
        }
    }

    pub fn with_delivery(mut self, delivery: &str) -> Self {
        self.delivery = Some(delivery.to_string());
        self
    }

    pub fn with_settled_units(mut self, units: Option<i64>) -> Self {
        self.settled_units = units;
        self
    }
}

pub struct Journal {
    file: Mutex<tokio::fs::File>,
    last_hash: Mutex<Option<String>>,
}

impl Journal {
    /// Opens `path` for appending and resumes the chain from its last line.
    pub async fn open(path: &str) -> Result<Arc<Self>, String> {
        let last_hash = tokio::fs::read_to_string(path)
            .await
            .ok()
            .and_then(|text| {
                text.lines().rev().find_map(|line| {
                    serde_json::from_str::<JournalRecord>(line)
                        .ok()
                        .map(|rec| rec.record_hash)
                })
            });
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| format!("failed to open journal {path}: {e}"))?;
        Ok(Arc::new(Self {
            file: Mutex::new(file),
            last_hash: Mutex::new(last_hash),
        }))
    }

    pub async fn append(&self, mut rec: JournalRecord) {
        let mut last_hash = self.last_hash.lock().await;
        rec.prev_hash = last_hash.clone();
        rec.record_hash = match rec.seal() {
            Ok(hash) => hash,
            Err(err) => {
                warn!(error = %err, "journal record not hashable");
                return;
            }
        };
        let line = match serde_json::to_string(&rec) {
            Ok(line) => line,
            Err(err) => {
                warn!(error = %err, "journal record not serializable");
                return;
            }
        };

        let mut file = self.file.lock().await;
        let written = match file.write_all(format!("{line}\n").as_bytes()).await {
            Ok(()) => file.flush().await,
            Err(err) => Err(err),
        };
        if let Err(err) = written {
            warn!(error = %err, "journal write failed");
            return;
        }
        *last_hash = Some(rec.record_hash);
    }
}

/// Why a journal file failed verification. Line numbers are 1-based.
#[derive(Debug, Error)]
pub enum JournalError {
    #[error("journal unreadable: {0}")]
    Read(#[from] std::io::Error),
    #[error("line {line}: not a journal record: {source}")]
    Parse {
        line: usize,
        source: serde_json::Error,
    },
    #[error("line {line}: record cannot be canonicalized: {reason}")]
    Canonical { line: usize, reason: String },
    #[error("line {line}: does not follow the previous record")]
    BrokenLink { line: usize },
    #[error("line {line}: contents do not match its seal")]
    Tampered { line: usize },
}

impl JournalRecord {
    /// SHA-256 over the JCS form with `record_hash` blanked.
    fn seal(&self) -> Result<String, String> {
        let mut unsealed = self.clone();
        unsealed.record_hash.clear();
        let canonical = serde_jcs::to_string(&unsealed)
            .map_err(|e| format!("failed to canonicalize journal record: {e}"))?;
        Ok(hex(&Sha256::digest(canonical.as_bytes())))
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Walks the journal at `path` and returns how many records it holds.
/// The first record may point anywhere, since the file can start mid-chain
/// after rotation.
pub fn verify_journal_chain(path: impl AsRef<Path>) -> Result<usize, JournalError> {
    let text = std::fs::read_to_string(path)?;
    let mut tip: Option<String> = None;
    let mut verified = 0;

    let lines = text
        .lines()
        .enumerate()
        .map(|(idx, raw)| (idx + 1, raw))
        .filter(|(_, raw)| !raw.trim().is_empty());
    for (line, raw) in lines {
        let rec: JournalRecord =
            serde_json::from_str(raw).map_err(|source| JournalError::Parse { line, source })?;
        if tip.is_some() && rec.prev_hash != tip {
            return Err(JournalError::BrokenLink { line });
        }
        let seal = rec
            .seal()
            .map_err(|reason| JournalError::Canonical { line, reason })?;
        if seal != rec.record_hash {
            return Err(JournalError::Tampered { line });
        }
        tip = Some(rec.record_hash);
        verified += 1;
    }
    Ok(verified)
}
