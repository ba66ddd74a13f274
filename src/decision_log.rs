//! Hash-chained decision audit log
//!
//! Every create/enhance/reuse decision is appended as one JSON line:
//! - SHA-256 content hash of the record
//! - Link to the previous line's hash
//!
//! Tampering with or dropping a line breaks the chain, which
//! [`verify_log`] reports.

use crate::error::{AdvisorError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Sink for decision records
pub trait DecisionLog: Send + Sync {
    fn append(&self, record: &Value) -> Result<()>;
}

/// Hash content with SHA-256
pub fn hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// One line of the log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub record: Value,
    pub content_hash: String,
    pub previous_hash: Option<String>,
}

/// Append-only JSON-lines log
pub struct JsonlDecisionLog {
    path: PathBuf,
    last_hash: Mutex<Option<String>>,
}

impl JsonlDecisionLog {
    /// Open (or start) a log, picking up the chain head from the last line.
    pub fn open(path: &Path) -> Result<Self> {
        let last_hash = if path.exists() {
            fs::read_to_string(path)?
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .map(serde_json::from_str::<LogEntry>)
                .transpose()?
                .map(|e| e.content_hash)
        } else {
            None
        };
        Ok(Self {
            path: path.to_path_buf(),
            last_hash: Mutex::new(last_hash),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DecisionLog for JsonlDecisionLog {
    fn append(&self, record: &Value) -> Result<()> {
        let mut last = self
            .last_hash
            .lock()
            .map_err(|_| AdvisorError::DecisionLog("log lock poisoned".to_string()))?;

        let content = serde_json::to_vec(record)?;
        let entry = LogEntry {
            record: record.clone(),
            content_hash: hash(&content),
            previous_hash: last.clone(),
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| AdvisorError::DecisionLog(e.to_string()))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| AdvisorError::DecisionLog(format!("{:?}: {}", self.path, e)))?;
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');
        file.write_all(line.as_bytes())
            .map_err(|e| AdvisorError::DecisionLog(e.to_string()))?;

        *last = Some(entry.content_hash);
        Ok(())
    }
}

/// Result of chain verification
#[derive(Debug, Clone, Serialize)]
pub struct ChainVerification {
    pub valid: bool,
    pub errors: Vec<String>,
    pub chain_length: usize,
}

/// Re-hash every record and check the chain links.
pub fn verify_log(path: &Path) -> Result<ChainVerification> {
    let text = fs::read_to_string(path)?;
    let mut errors = Vec::new();
    let mut prev_hash: Option<String> = None;
    let mut chain_length = 0;

    for (i, line) in text.lines().filter(|l| !l.trim().is_empty()).enumerate() {
        chain_length += 1;
        let entry: LogEntry = match serde_json::from_str(line) {
            Ok(e) => e,
            Err(e) => {
                errors.push(format!("Unparseable entry at position {}: {}", i, e));
                prev_hash = None;
                continue;
            }
        };

        if i > 0 && entry.previous_hash != prev_hash {
            errors.push(format!(
                "Chain break at position {}: expected prev_hash {:?}, got {:?}",
                i, prev_hash, entry.previous_hash
            ));
        }

        let computed = hash(&serde_json::to_vec(&entry.record)?);
        if computed != entry.content_hash {
            errors.push(format!(
                "Hash mismatch at position {}: computed {}, stored {}",
                i, computed, entry.content_hash
            ));
        }

        prev_hash = Some(entry.content_hash);
    }

    Ok(ChainVerification {
        valid: errors.is_empty(),
        errors,
        chain_length,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_hash_is_stable() {
        assert_eq!(hash(b"abc"), hash(b"abc"));
        assert_ne!(hash(b"abc"), hash(b"abd"));
    }

    #[test]
    fn test_chain_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("decisions.jsonl");

        let log = JsonlDecisionLog::open(&path).unwrap();
        log.append(&json!({"action": "create"})).unwrap();
        log.append(&json!({"action": "reuse"})).unwrap();

        let reopened = JsonlDecisionLog::open(&path).unwrap();
        reopened.append(&json!({"action": "enhance"})).unwrap();

        let v = verify_log(&path).unwrap();
        assert!(v.valid, "{:?}", v.errors);
        assert_eq!(v.chain_length, 3);
    }

    #[test]
    fn test_tampering_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("decisions.jsonl");
        let log = JsonlDecisionLog::open(&path).unwrap();
        log.append(&json!({"action": "create", "score": 0.2})).unwrap();
        log.append(&json!({"action": "reuse"})).unwrap();

        let tampered = fs::read_to_string(&path).unwrap().replace("0.2", "0.9");
        fs::write(&path, tampered).unwrap();

        let v = verify_log(&path).unwrap();
        assert!(!v.valid);
    }

    #[test]
    fn test_unwritable_path_errors() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the file should be
        let path = dir.path().join("taken");
        fs::create_dir_all(&path).unwrap();
        let log = JsonlDecisionLog {
            path,
            last_hash: Mutex::new(None),
        };
        assert!(log.append(&json!({"x": 1})).is_err());
    }
}
