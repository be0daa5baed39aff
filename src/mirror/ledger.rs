//! Append-only correction ledger.
//!
//! Records every extension/category correction the classifier makes, for
//! audit. Entries are never mutated after creation. The ledger is persisted
//! as JSON at the output root and reloaded on the next run so the ignore
//! filter and existence checks can account for prior corrections.

use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::files;

/// A single recorded correction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CorrectionRecord {
    pub local_path: String,
    pub old_extension: String,
    pub new_extension: String,
    pub timestamp: DateTime<Utc>,
}

/// Thread-safe append-only log of corrections.
pub struct CorrectionLedger {
    entries: Mutex<Vec<CorrectionRecord>>,
}

impl CorrectionLedger {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Load a ledger persisted by a previous run. A missing report file
    /// yields an empty ledger.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read correction report {path:?}"))?;
        let entries: Vec<CorrectionRecord> = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse correction report {path:?}"))?;
        debug!("Loaded {} prior correction(s) from {:?}", entries.len(), path);
        Ok(Self {
            entries: Mutex::new(entries),
        })
    }

    /// Append a correction.
    pub fn record(&self, local_path: &Path, old_extension: &str, new_extension: &str) {
        let record = CorrectionRecord {
            local_path: local_path.to_string_lossy().into_owned(),
            old_extension: old_extension.to_string(),
            new_extension: new_extension.to_string(),
            timestamp: Utc::now(),
        };
        debug!(
            "Recorded extension correction {} -> {} for {:?}",
            old_extension, new_extension, local_path
        );
        self.entries
            .lock()
            .expect("ledger mutex poisoned")
            .push(record);
    }

    /// The filename a given declared filename would carry after any recorded
    /// correction, matching by base name. Used by the ignore filter so a
    /// name listed post-correction still matches.
    pub fn corrected_name(&self, declared_filename: &str) -> Option<String> {
        let base = files::base_name(declared_filename);
        let entries = self.entries.lock().expect("ledger mutex poisoned");
        entries
            .iter()
            .rev()
            .find(|record| {
                Path::new(&record.local_path)
                    .file_name()
                    .map(|name| files::base_name(&name.to_string_lossy()) == base)
                    .unwrap_or(false)
            })
            .map(|record| files::with_extension(declared_filename, &record.new_extension))
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("ledger mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<CorrectionRecord> {
        self.entries.lock().expect("ledger mutex poisoned").clone()
    }

    /// Persist the ledger for audit and for the next run.
    pub fn save(&self, path: &Path) -> Result<()> {
        let entries = self.snapshot();
        let json = serde_json::to_string_pretty(&entries)
            .context("failed to serialize correction report")?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write correction report {path:?}"))?;
        Ok(())
    }
}

impl Default for CorrectionLedger {
    fn default() -> Self {
        Self::new()
    }
}
