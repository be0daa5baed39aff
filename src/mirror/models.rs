//! Data models for the mirror pipeline.
//!
//! Defines asset descriptors, per-download outcomes, classification and
//! verification results, and the aggregated run summary.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Media category a file belongs to, decided from content (never from the
/// URL or declared filename once the bytes are on disk).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaCategory {
    Image,
    Video,
    Other,
}

impl MediaCategory {
    /// Folder name under a creator's root for this category.
    pub fn folder_name(&self) -> &'static str {
        match self {
            MediaCategory::Image => "Images",
            MediaCategory::Video => "Videos",
            MediaCategory::Other => "Other",
        }
    }
}

/// A remote asset reference prior to download. Immutable once resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetDescriptor {
    /// Unique id assigned by the remote platform.
    pub remote_id: String,
    /// Direct URL for the asset bytes.
    pub source_url: String,
    /// Filename the platform advertises (derived from the URL path).
    pub declared_filename: String,
    /// Category implied by the declared extension. Governs inclusion only;
    /// the true category is decided after download by the classifier.
    pub declared_category: MediaCategory,
    /// Creator this asset belongs to.
    pub creator_id: String,
}

/// Why a descriptor was skipped without producing a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Filename is listed in the creator's ignore.txt.
    Ignored,
    /// A file with the same base name already exists in the destination.
    AlreadyPresent,
    /// Content classified into a category the creator has disabled.
    CategoryDisabled,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Ignored => "ignored",
            SkipReason::AlreadyPresent => "already_present",
            SkipReason::CategoryDisabled => "category_disabled",
        }
    }
}

/// Terminal outcome of one descriptor's trip through the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    Success,
    Skipped(SkipReason),
    Failed(String),
}

/// Result of processing a single descriptor. Terminal once returned.
#[derive(Debug, Clone)]
pub struct DownloadResult {
    pub descriptor: AssetDescriptor,
    /// Final promoted path; None unless outcome is Success.
    pub local_path: Option<PathBuf>,
    pub byte_count: u64,
    pub outcome: DownloadOutcome,
}

impl DownloadResult {
    pub fn skipped(descriptor: AssetDescriptor, reason: SkipReason) -> Self {
        Self {
            descriptor,
            local_path: None,
            byte_count: 0,
            outcome: DownloadOutcome::Skipped(reason),
        }
    }

    pub fn failed(descriptor: AssetDescriptor, reason: String) -> Self {
        Self {
            descriptor,
            local_path: None,
            byte_count: 0,
            outcome: DownloadOutcome::Failed(reason),
        }
    }
}

/// What the classifier decided about a downloaded file.
///
/// Invariant: `detected_category` and `detected_extension` are derived solely
/// from the file content, never from the URL or declared filename.
#[derive(Debug, Clone)]
pub struct ClassificationResult {
    pub local_path: PathBuf,
    pub detected_category: MediaCategory,
    /// Canonical extension for the detected format; the declared extension
    /// when no signature matched.
    pub detected_extension: String,
    pub declared_extension: String,
    pub corrected: bool,
}

/// Verification status of a file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationStatus {
    Ok,
    Corrupt(String),
    /// The probe utility is not available on this host; the file is neither
    /// verified nor corrupt.
    Unknown,
}

#[derive(Debug, Clone)]
pub struct VerificationResult {
    pub local_path: PathBuf,
    pub status: VerificationStatus,
}

/// Error raised while fetching asset bytes.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("asset not found: {0}")]
    NotFound(String),

    #[error("authorization rejected: {0}")]
    Auth(String),

    #[error("truncated body: received {received} of {expected} bytes")]
    Truncated { received: u64, expected: u64 },

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("run cancelled")]
    Cancelled,
}

impl FetchError {
    /// Whether the retry loop should attempt this descriptor again.
    /// Auth failures, missing assets, local I/O failures and cancellation
    /// are never retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::Connection(_) | FetchError::Timeout(_) | FetchError::Truncated { .. }
        )
    }

    /// Auth failures abort the whole creator, not just the descriptor.
    pub fn is_auth(&self) -> bool {
        matches!(self, FetchError::Auth(_))
    }
}

/// Per-creator tally, aggregated by outcome kind so it is independent of
/// completion order.
#[derive(Debug, Clone, Default)]
pub struct CreatorSummary {
    pub creator: String,
    pub listed: usize,
    pub downloaded: usize,
    pub skipped_ignored: usize,
    pub skipped_existing: usize,
    pub skipped_category_disabled: usize,
    pub verified_ok: usize,
    pub corrupt: usize,
    pub unverified: usize,
    pub corrections: usize,
    /// (asset identifier, reason) for every failed descriptor.
    pub failures: Vec<(String, String)>,
}

impl CreatorSummary {
    pub fn new(creator: &str) -> Self {
        Self {
            creator: creator.to_string(),
            ..Default::default()
        }
    }

    pub fn record(&mut self, result: &DownloadResult) {
        match &result.outcome {
            DownloadOutcome::Success => self.downloaded += 1,
            DownloadOutcome::Skipped(SkipReason::Ignored) => self.skipped_ignored += 1,
            DownloadOutcome::Skipped(SkipReason::AlreadyPresent) => self.skipped_existing += 1,
            DownloadOutcome::Skipped(SkipReason::CategoryDisabled) => {
                self.skipped_category_disabled += 1
            }
            DownloadOutcome::Failed(reason) => self
                .failures
                .push((result.descriptor.remote_id.clone(), reason.clone())),
        }
    }

    pub fn record_verification(&mut self, result: &VerificationResult) {
        match &result.status {
            VerificationStatus::Ok => self.verified_ok += 1,
            VerificationStatus::Corrupt(_) => self.corrupt += 1,
            VerificationStatus::Unknown => self.unverified += 1,
        }
    }
}

/// Whole-run summary across creators.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub creators: Vec<CreatorSummary>,
    /// Creators whose catalog could not be enumerated at all.
    pub creators_failed: Vec<(String, String)>,
}

impl RunSummary {
    pub fn total_downloaded(&self) -> usize {
        self.creators.iter().map(|c| c.downloaded).sum()
    }

    pub fn total_failures(&self) -> usize {
        self.creators.iter().map(|c| c.failures.len()).sum()
    }

    pub fn total_corrupt(&self) -> usize {
        self.creators.iter().map(|c| c.corrupt).sum()
    }

    pub fn total_unverified(&self) -> usize {
        self.creators.iter().map(|c| c.unverified).sum()
    }
}

/// One entry in the corrupt-media report consumed by the repair workflow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CorruptEntry {
    pub filename: String,
    pub path: String,
    pub reason: String,
    /// Source URL captured when the corruption was detected during a
    /// download run; absent for files found by a standalone verify scan.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Corrupt-media report persisted at the output root between a verify pass
/// and a repair run.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CorruptReport {
    pub generated_at: String,
    pub creators: BTreeMap<String, Vec<CorruptEntry>>,
}

impl CorruptReport {
    pub fn total_entries(&self) -> usize {
        self.creators.values().map(|v| v.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.creators.values().all(|v| v.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_folder_names() {
        assert_eq!(MediaCategory::Image.folder_name(), "Images");
        assert_eq!(MediaCategory::Video.folder_name(), "Videos");
        assert_eq!(MediaCategory::Other.folder_name(), "Other");
    }

    #[test]
    fn test_fetch_error_retryability() {
        assert!(FetchError::Connection("refused".into()).is_retryable());
        assert!(FetchError::Timeout("deadline".into()).is_retryable());
        assert!(FetchError::Truncated {
            received: 10,
            expected: 20
        }
        .is_retryable());

        assert!(!FetchError::NotFound("gone".into()).is_retryable());
        assert!(!FetchError::Auth("bad key".into()).is_retryable());
        assert!(!FetchError::Filesystem("disk full".into()).is_retryable());
        assert!(!FetchError::Cancelled.is_retryable());
    }

    #[test]
    fn test_summary_aggregates_by_outcome_kind() {
        let descriptor = AssetDescriptor {
            remote_id: "a1".into(),
            source_url: "https://cdn.example/a1.jpg".into(),
            declared_filename: "a1.jpg".into(),
            declared_category: MediaCategory::Image,
            creator_id: "alice".into(),
        };

        let mut summary = CreatorSummary::new("alice");
        summary.record(&DownloadResult {
            descriptor: descriptor.clone(),
            local_path: Some(PathBuf::from("/tmp/a1.jpg")),
            byte_count: 3,
            outcome: DownloadOutcome::Success,
        });
        summary.record(&DownloadResult::skipped(
            descriptor.clone(),
            SkipReason::Ignored,
        ));
        summary.record(&DownloadResult::failed(descriptor, "boom".into()));

        assert_eq!(summary.downloaded, 1);
        assert_eq!(summary.skipped_ignored, 1);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0], ("a1".to_string(), "boom".to_string()));
    }
}
