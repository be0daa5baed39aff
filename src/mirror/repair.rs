//! Repair workflow for files flagged corrupt by a previous verify pass.
//!
//! Each report entry is re-downloaded into staging, re-verified there, and
//! only a verified-good replacement is swapped over the corrupt file. A
//! failed repair never touches the existing file, so the mirror can only
//! get better.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::files::{self, FileLayout};
use crate::mirror::classifier;
use crate::mirror::models::{
    AssetDescriptor, CorruptEntry, CorruptReport, VerificationStatus,
};
use crate::mirror::orchestrator::DownloadOrchestrator;
use crate::mirror::verifier::IntegrityVerifier;

/// CDN template used to rebuild a source URL from a bare filename when the
/// report entry predates URL capture. The media id doubles as the path key.
const FALLBACK_VIDEO_URL: &str =
    "https://image.civitai.com/xG1nkqKTMzGDvpLrqFT7WA/{id}/original-video=true,quality=100/{name}";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairStatus {
    /// Replacement downloaded, verified sound, and swapped in.
    Repaired,
    /// Replacement downloaded but still verifies as corrupt; the old file
    /// is left untouched.
    StillCorrupt(String),
    /// Replacement could not be obtained or verified at all.
    RepairFailed(String),
}

#[derive(Debug, Clone)]
pub struct RepairCandidate {
    pub creator: String,
    pub entry: CorruptEntry,
}

#[derive(Debug, Clone)]
pub struct RepairOutcome {
    pub candidate: RepairCandidate,
    pub status: RepairStatus,
}

pub struct RepairManager {
    orchestrator: Arc<DownloadOrchestrator>,
    verifier: Arc<IntegrityVerifier>,
    layout: FileLayout,
}

impl RepairManager {
    pub fn new(
        orchestrator: Arc<DownloadOrchestrator>,
        verifier: Arc<IntegrityVerifier>,
        layout: FileLayout,
    ) -> Self {
        Self {
            orchestrator,
            verifier,
            layout,
        }
    }

    /// Load the corrupt-media report from the output root. A missing report
    /// means nothing to repair.
    pub fn load_report(&self) -> Result<CorruptReport> {
        let path = self.layout.corrupt_report_path();
        if !path.exists() {
            return Ok(CorruptReport::default());
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read corrupt report {path:?}"))?;
        serde_json::from_str(&content)
            .with_context(|| format!("malformed corrupt report {path:?}"))
    }

    /// Flatten the report into candidates, preserving creator order.
    pub fn candidates(report: &CorruptReport) -> Vec<RepairCandidate> {
        report
            .creators
            .iter()
            .flat_map(|(creator, entries)| {
                entries.iter().map(|entry| RepairCandidate {
                    creator: creator.clone(),
                    entry: entry.clone(),
                })
            })
            .collect()
    }

    /// Attempt every candidate in the report, then rewrite it with whatever
    /// is still corrupt. An emptied report is deleted.
    pub async fn execute(
        &self,
        report: &CorruptReport,
        cancel: &CancellationToken,
    ) -> Result<Vec<RepairOutcome>> {
        let candidates = Self::candidates(report);
        let mut outcomes = Vec::with_capacity(candidates.len());

        for candidate in candidates {
            if cancel.is_cancelled() {
                outcomes.push(RepairOutcome {
                    candidate,
                    status: RepairStatus::RepairFailed("run cancelled".to_string()),
                });
                continue;
            }
            let status = self.repair_one(&candidate, cancel).await;
            match &status {
                RepairStatus::Repaired => {
                    info!("Repaired '{}'", candidate.entry.filename)
                }
                RepairStatus::StillCorrupt(reason) => warn!(
                    "Replacement for '{}' still corrupt: {}",
                    candidate.entry.filename, reason
                ),
                RepairStatus::RepairFailed(reason) => {
                    warn!("Repair of '{}' failed: {}", candidate.entry.filename, reason)
                }
            }
            outcomes.push(RepairOutcome { candidate, status });
        }

        self.save_remaining(&outcomes)?;
        Ok(outcomes)
    }

    async fn repair_one(
        &self,
        candidate: &RepairCandidate,
        cancel: &CancellationToken,
    ) -> RepairStatus {
        let descriptor = self.descriptor_for(candidate);

        // Same retry policy as a first download, so a transient blip does
        // not burn the candidate.
        let (staged, _bytes) = match self.orchestrator.fetch_with_retries(&descriptor, cancel).await
        {
            Ok(staged) => staged,
            Err(e) => return RepairStatus::RepairFailed(e.to_string()),
        };

        let classification = match classifier::classify(staged.path(), &descriptor.declared_filename)
        {
            Ok(c) => c,
            Err(e) => return RepairStatus::RepairFailed(e.to_string()),
        };

        let verification = self
            .verifier
            .verify(staged.path(), classification.detected_category)
            .await;

        match verification.status {
            VerificationStatus::Ok => {
                let target = Path::new(&candidate.entry.path);
                match self.layout.promote(staged, target) {
                    Ok(()) => RepairStatus::Repaired,
                    Err(e) => RepairStatus::RepairFailed(e.to_string()),
                }
            }
            VerificationStatus::Corrupt(reason) => RepairStatus::StillCorrupt(reason),
            VerificationStatus::Unknown => {
                RepairStatus::RepairFailed("verification unavailable on this host".to_string())
            }
        }
    }

    fn descriptor_for(&self, candidate: &RepairCandidate) -> AssetDescriptor {
        let entry = &candidate.entry;
        let source_url = entry
            .url
            .clone()
            .unwrap_or_else(|| rebuild_fallback_url(&entry.filename));

        AssetDescriptor {
            remote_id: files::base_name(&entry.filename),
            source_url,
            declared_filename: entry.filename.clone(),
            declared_category: self.layout.declared_category(&entry.filename),
            creator_id: candidate.creator.clone(),
        }
    }

    /// Persist the entries that did not repair, or delete the report when
    /// everything was fixed.
    fn save_remaining(&self, outcomes: &[RepairOutcome]) -> Result<()> {
        let mut remaining = CorruptReport {
            generated_at: Utc::now().to_rfc3339(),
            ..Default::default()
        };
        for outcome in outcomes {
            let keep = match &outcome.status {
                RepairStatus::Repaired => false,
                RepairStatus::StillCorrupt(_) | RepairStatus::RepairFailed(_) => true,
            };
            if keep {
                remaining
                    .creators
                    .entry(outcome.candidate.creator.clone())
                    .or_default()
                    .push(outcome.candidate.entry.clone());
            }
        }

        let path = self.layout.corrupt_report_path();
        if remaining.is_empty() {
            if path.exists() {
                std::fs::remove_file(&path)
                    .with_context(|| format!("failed to remove corrupt report {path:?}"))?;
            }
            return Ok(());
        }

        let content =
            serde_json::to_string_pretty(&remaining).context("failed to serialise corrupt report")?;
        std::fs::write(&path, content)
            .with_context(|| format!("failed to write corrupt report {path:?}"))?;
        Ok(())
    }
}

fn rebuild_fallback_url(filename: &str) -> String {
    FALLBACK_VIDEO_URL
        .replace("{id}", &files::base_name(filename))
        .replace("{name}", filename)
}
