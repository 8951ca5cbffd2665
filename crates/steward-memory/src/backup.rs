//! Append-only JSONL backup for the collective collections. Every mutating
//! call on identity/preferences/contacts also lands here; on startup, an
//! empty collective store triggers a replay.
//!
//! Replay is idempotent because every record carries the id assigned at
//! write time — restoring twice upserts the same rows.

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupRecord {
    pub collection: String,
    pub id: String,
    pub text: String,
    pub metadata: serde_json::Value,
    pub timestamp: String,
}

pub struct BackupLog {
    path: PathBuf,
}

impl BackupLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record. Creates the file (and parent directories) on first
    /// write.
    pub fn append(&self, record: &BackupRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let line = serde_json::to_string(record)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    /// Read every parseable record. Corrupt lines are skipped with a warning;
    /// a missing file is an empty backup, not an error.
    pub fn replay(&self) -> Vec<BackupRecord> {
        let file = match std::fs::File::open(&self.path) {
            Ok(f) => f,
            Err(_) => return Vec::new(),
        };

        let mut records = Vec::new();
        for (lineno, line) in BufReader::new(file).lines().enumerate() {
            let line = match line {
                Ok(l) => l,
                Err(e) => {
                    warn!(path = %self.path.display(), lineno, error = %e, "unreadable backup line, skipping");
                    continue;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<BackupRecord>(&line) {
                Ok(rec) => records.push(rec),
                Err(e) => {
                    warn!(path = %self.path.display(), lineno, error = %e, "corrupt backup line, skipping");
                }
            }
        }
        records
    }
}
