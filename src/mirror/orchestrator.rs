//! Concurrent download orchestration.
//!
//! Runs a bounded pool of workers over a creator's descriptors. Every
//! attempt goes through the shared request pacer and reserves its advertised
//! size against the memory budget before the body is read. Bytes land in a
//! staging file, get classified from content, and reach a category folder
//! only through an atomic promotion.

use std::collections::HashSet;
use std::io::Write;
use std::sync::Arc;

use futures::{stream, StreamExt};
use tempfile::NamedTempFile;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::catalog::AssetSource;
use crate::files::{self, FileLayout};
use crate::mirror::classifier;
use crate::mirror::ledger::CorrectionLedger;
use crate::mirror::limiter::RequestPacer;
use crate::mirror::memory::MemoryBudget;
use crate::mirror::models::{
    AssetDescriptor, DownloadOutcome, DownloadResult, FetchError, MediaCategory, SkipReason,
};
use crate::mirror::retry::RetryPolicy;

/// Budget reservation used when the server does not advertise a length.
const UNKNOWN_SIZE_RESERVATION: u64 = 8 * 1024 * 1024;

/// Which categories a creator wants mirrored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategorySelection {
    pub images: bool,
    pub videos: bool,
    pub other: bool,
}

impl Default for CategorySelection {
    fn default() -> Self {
        Self {
            images: true,
            videos: true,
            other: true,
        }
    }
}

impl CategorySelection {
    pub fn enabled(&self, category: MediaCategory) -> bool {
        match category {
            MediaCategory::Image => self.images,
            MediaCategory::Video => self.videos,
            MediaCategory::Other => self.other,
        }
    }
}

/// Everything one batch produced: a terminal result per descriptor, plus
/// the rejection reason when an authorization failure stopped the batch.
pub struct BatchReport {
    pub results: Vec<DownloadResult>,
    pub auth_failure: Option<String>,
}

/// Shared state for one batch. The token is a child of the run-wide one so
/// an auth rejection stops this creator without touching the rest of the
/// run.
struct BatchControl {
    cancel: CancellationToken,
    auth_failure: std::sync::Mutex<Option<String>>,
}

impl BatchControl {
    fn abort_reason(&self) -> Option<String> {
        self.auth_failure
            .lock()
            .expect("batch mutex poisoned")
            .clone()
    }

    fn abort(&self, reason: String) {
        self.auth_failure
            .lock()
            .expect("batch mutex poisoned")
            .get_or_insert(reason);
        self.cancel.cancel();
    }
}

pub struct DownloadOrchestrator {
    source: Arc<dyn AssetSource>,
    layout: FileLayout,
    pacer: Arc<RequestPacer>,
    memory: MemoryBudget,
    retry: RetryPolicy,
    ledger: Arc<CorrectionLedger>,
    concurrency: usize,
}

impl DownloadOrchestrator {
    pub fn new(
        source: Arc<dyn AssetSource>,
        layout: FileLayout,
        pacer: Arc<RequestPacer>,
        memory: MemoryBudget,
        retry: RetryPolicy,
        ledger: Arc<CorrectionLedger>,
        concurrency: usize,
    ) -> Self {
        Self {
            source,
            layout,
            pacer,
            memory,
            retry,
            ledger,
            concurrency: concurrency.max(1),
        }
    }

    /// Download a batch of descriptors with bounded concurrency.
    ///
    /// Returns one terminal result per descriptor. Cancellation stops new
    /// fetches; descriptors that never started report as failed with a
    /// cancellation reason. An authorization rejection aborts the whole
    /// batch, since every remaining descriptor carries the same credential.
    pub async fn run(
        &self,
        descriptors: Vec<AssetDescriptor>,
        selection: CategorySelection,
        existing: &HashSet<String>,
        cancel: &CancellationToken,
    ) -> BatchReport {
        let total = descriptors.len();
        let control = BatchControl {
            cancel: cancel.child_token(),
            auth_failure: std::sync::Mutex::new(None),
        };
        let results: Vec<DownloadResult> = stream::iter(descriptors)
            .map(|descriptor| self.process_one(descriptor, selection, existing, &control))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        debug!("Orchestrator finished batch of {} descriptor(s)", total);
        BatchReport {
            results,
            auth_failure: control.abort_reason(),
        }
    }

    async fn process_one(
        &self,
        descriptor: AssetDescriptor,
        selection: CategorySelection,
        existing: &HashSet<String>,
        control: &BatchControl,
    ) -> DownloadResult {
        let cancel = &control.cancel;
        if cancel.is_cancelled() {
            let reason = control
                .abort_reason()
                .unwrap_or_else(|| FetchError::Cancelled.to_string());
            return DownloadResult::failed(descriptor, reason);
        }

        // Extension-agnostic existence check, so a file whose extension was
        // corrected in a previous run still counts as present.
        if existing.contains(&files::base_name(&descriptor.declared_filename)) {
            return DownloadResult::skipped(descriptor, SkipReason::AlreadyPresent);
        }

        let (staged, byte_count) = match self.fetch_with_retries(&descriptor, cancel).await {
            Ok(staged) => staged,
            Err(e) => {
                if e.is_auth() {
                    warn!(
                        "Authorization rejected for '{}', aborting the batch",
                        descriptor.creator_id
                    );
                    control.abort(e.to_string());
                }
                return DownloadResult::failed(descriptor, e.to_string());
            }
        };

        let classification = match classifier::classify(staged.path(), &descriptor.declared_filename)
        {
            Ok(c) => c,
            Err(e) => {
                return DownloadResult::failed(
                    descriptor,
                    FetchError::Filesystem(e.to_string()).to_string(),
                )
            }
        };

        // The true category is only known after the bytes are inspected;
        // content that lands in a disabled category is discarded here.
        if !selection.enabled(classification.detected_category) {
            debug!(
                "Discarding '{}': classified {:?}, disabled for '{}'",
                descriptor.declared_filename,
                classification.detected_category,
                descriptor.creator_id
            );
            return DownloadResult::skipped(descriptor, SkipReason::CategoryDisabled);
        }

        let final_name = if classification.corrected {
            files::with_extension(
                &descriptor.declared_filename,
                &classification.detected_extension,
            )
        } else {
            descriptor.declared_filename.clone()
        };
        let final_path = self
            .layout
            .category_dir(&descriptor.creator_id, classification.detected_category)
            .join(&final_name);

        if let Err(e) = self.layout.promote(staged, &final_path) {
            return DownloadResult::failed(
                descriptor,
                FetchError::Filesystem(e.to_string()).to_string(),
            );
        }

        if classification.corrected {
            info!(
                "Corrected extension for '{}': {} -> {}",
                descriptor.declared_filename,
                classification.declared_extension,
                classification.detected_extension
            );
            self.ledger.record(
                &final_path,
                &classification.declared_extension,
                &classification.detected_extension,
            );
        }

        DownloadResult {
            descriptor,
            local_path: Some(final_path),
            byte_count,
            outcome: DownloadOutcome::Success,
        }
    }

    /// Fetch one asset into staging, retrying transient failures under the
    /// configured policy. Also used by the repair workflow, so a repair
    /// re-fetch survives the same flakiness as a first download.
    pub(crate) async fn fetch_with_retries(
        &self,
        descriptor: &AssetDescriptor,
        cancel: &CancellationToken,
    ) -> Result<(NamedTempFile, u64), FetchError> {
        let mut attempt: u32 = 0;
        loop {
            match self.fetch_to_staging(descriptor, cancel).await {
                Ok(staged) => return Ok(staged),
                Err(e) if self.retry.should_retry(&e, attempt) => {
                    warn!(
                        "Fetch attempt {} for '{}' failed ({}), retrying",
                        attempt + 1,
                        descriptor.declared_filename,
                        e
                    );
                    // Backoff first, then rejoin the pacer queue: the
                    // observed delay is whichever of the two is larger.
                    if !self.retry.wait(cancel).await {
                        return Err(FetchError::Cancelled);
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One attempt: fetch into a staging file, honoring the pacer and
    /// memory budget.
    async fn fetch_to_staging(
        &self,
        descriptor: &AssetDescriptor,
        cancel: &CancellationToken,
    ) -> Result<(NamedTempFile, u64), FetchError> {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        self.pacer.acquire().await;

        let response = self.source.fetch(&descriptor.source_url).await?;
        let expected = response.content_length;

        // Reserve before any body bytes are read so the pool's in-flight
        // total never exceeds the budget.
        let _reservation = self
            .memory
            .reserve(expected.unwrap_or(UNKNOWN_SIZE_RESERVATION))
            .await;

        let mut staged = self
            .layout
            .staging_file(&descriptor.creator_id)
            .map_err(|e| FetchError::Filesystem(e.to_string()))?;

        let mut body = response.body;
        let mut received: u64 = 0;
        loop {
            let chunk = tokio::select! {
                chunk = body.next() => chunk,
                _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            };
            match chunk {
                Some(Ok(bytes)) => {
                    received += bytes.len() as u64;
                    staged
                        .write_all(&bytes)
                        .map_err(|e| FetchError::Filesystem(e.to_string()))?;
                }
                Some(Err(e)) => return Err(e),
                None => break,
            }
        }

        if let Some(expected) = expected {
            if received != expected {
                return Err(FetchError::Truncated { received, expected });
            }
        }

        staged
            .flush()
            .map_err(|e| FetchError::Filesystem(e.to_string()))?;

        Ok((staged, received))
    }
}
