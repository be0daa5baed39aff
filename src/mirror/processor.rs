//! Per-creator mirror pipeline.
//!
//! For each configured creator: enumerate the catalog, filter out ignored
//! and declared-disabled assets, hand the rest to the orchestrator, then
//! verify what was downloaded. Produces the run summary and maintains the
//! corrupt-media and extension-correction reports at the output root.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::catalog::resolver::AssetResolver;
use crate::catalog::CatalogError;
use crate::files::FileLayout;
use crate::mirror::ignore::IgnoreFilter;
use crate::mirror::ledger::CorrectionLedger;
use crate::mirror::models::{
    CorruptEntry, CorruptReport, CreatorSummary, DownloadOutcome, DownloadResult, MediaCategory,
    RunSummary, VerificationStatus,
};
use crate::mirror::orchestrator::{CategorySelection, DownloadOrchestrator};
use crate::mirror::verifier::IntegrityVerifier;

/// One creator as configured, with the categories they want mirrored.
#[derive(Debug, Clone)]
pub struct CreatorProfile {
    pub name: String,
    pub selection: CategorySelection,
}

struct CreatorOutcome {
    summary: CreatorSummary,
    corrupt: Vec<CorruptEntry>,
}

pub struct MirrorProcessor {
    resolver: AssetResolver,
    orchestrator: Arc<DownloadOrchestrator>,
    verifier: Arc<IntegrityVerifier>,
    ledger: Arc<CorrectionLedger>,
    layout: FileLayout,
    save_metadata: bool,
}

impl MirrorProcessor {
    pub fn new(
        resolver: AssetResolver,
        orchestrator: Arc<DownloadOrchestrator>,
        verifier: Arc<IntegrityVerifier>,
        ledger: Arc<CorrectionLedger>,
        layout: FileLayout,
        save_metadata: bool,
    ) -> Self {
        Self {
            resolver,
            orchestrator,
            verifier,
            ledger,
            layout,
            save_metadata,
        }
    }

    /// Run the full update pipeline over every configured creator.
    ///
    /// A creator whose catalog cannot be enumerated, or whose downloads hit
    /// an authorization rejection, is recorded as failed and the run moves
    /// on to the next creator.
    pub async fn run(
        &self,
        creators: &[CreatorProfile],
        cancel: &CancellationToken,
    ) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        let mut corrupt: Vec<(String, Vec<CorruptEntry>)> = Vec::new();

        for profile in creators {
            if cancel.is_cancelled() {
                info!("Run cancelled before creator '{}'", profile.name);
                break;
            }
            match self.process_creator(profile, cancel).await {
                Ok(outcome) => {
                    if !outcome.corrupt.is_empty() {
                        corrupt.push((profile.name.clone(), outcome.corrupt));
                    }
                    summary.creators.push(outcome.summary);
                }
                // A failed listing, auth rejection included, costs this
                // creator only; the rest of the run proceeds.
                Err(e) => {
                    warn!("Skipping creator '{}': {}", profile.name, e);
                    summary
                        .creators_failed
                        .push((profile.name.clone(), e.to_string()));
                }
            }
        }

        self.save_corrections()?;
        self.merge_corrupt_report(corrupt)?;
        Ok(summary)
    }

    async fn process_creator(
        &self,
        profile: &CreatorProfile,
        cancel: &CancellationToken,
    ) -> std::result::Result<CreatorOutcome, CatalogError> {
        info!("Processing creator '{}'", profile.name);
        let mut summary = CreatorSummary::new(&profile.name);

        let resolved = self.resolver.resolve(&profile.name, cancel).await?;
        summary.listed = resolved.descriptors.len();

        if self.save_metadata {
            if let Err(e) = self.export_metadata(&profile.name, &resolved.raw_items) {
                warn!("Metadata export for '{}' failed: {:#}", profile.name, e);
            }
        }

        // Declared category governs inclusion; assets of a disabled
        // category are never fetched.
        let (candidates, declared_disabled): (Vec<_>, Vec<_>) = resolved
            .descriptors
            .into_iter()
            .partition(|d| profile.selection.enabled(d.declared_category));
        summary.skipped_category_disabled += declared_disabled.len();

        let ignore = match self.layout.load_ignore_list(&profile.name) {
            Ok(names) => IgnoreFilter::new(names),
            Err(e) => {
                warn!("Ignore list for '{}' unreadable: {:#}", profile.name, e);
                IgnoreFilter::new(Default::default())
            }
        };
        let (candidates, ignored) = ignore.partition(candidates, &self.ledger);
        summary.skipped_ignored += ignored.len();

        let mut existing = std::collections::HashSet::new();
        for category in [MediaCategory::Image, MediaCategory::Video, MediaCategory::Other] {
            existing.extend(
                self.layout
                    .existing_base_names(&self.layout.category_dir(&profile.name, category)),
            );
        }

        let corrections_before = self.ledger.len();
        let batch = self
            .orchestrator
            .run(candidates, profile.selection, &existing, cancel)
            .await;

        // The CDN rejecting our credential fails this creator outright,
        // exactly like a rejection from the catalog listing.
        if let Some(reason) = batch.auth_failure {
            return Err(CatalogError::Auth(reason));
        }

        for result in &batch.results {
            summary.record(result);
        }
        summary.corrections = self.ledger.len() - corrections_before;

        let corrupt = self.verify_downloads(&mut summary, &batch.results).await;
        info!(
            "Creator '{}': {} listed, {} downloaded, {} failed, {} corrupt",
            profile.name,
            summary.listed,
            summary.downloaded,
            summary.failures.len(),
            summary.corrupt
        );

        Ok(CreatorOutcome { summary, corrupt })
    }

    /// Verify everything this run actually downloaded.
    async fn verify_downloads(
        &self,
        summary: &mut CreatorSummary,
        results: &[DownloadResult],
    ) -> Vec<CorruptEntry> {
        let mut corrupt = Vec::new();
        for result in results {
            if result.outcome != DownloadOutcome::Success {
                continue;
            }
            let Some(path) = result.local_path.as_deref() else {
                continue;
            };
            let category = category_from_path(path);
            let verification = self.verifier.verify(path, category).await;
            summary.record_verification(&verification);
            if let VerificationStatus::Corrupt(reason) = verification.status {
                corrupt.push(CorruptEntry {
                    filename: filename_of(path),
                    path: path.to_string_lossy().to_string(),
                    reason,
                    url: Some(result.descriptor.source_url.clone()),
                });
            }
        }
        corrupt
    }

    /// Standalone verify pass over files already on disk.
    ///
    /// Scans each creator's Images and Videos folders, rebuilds the
    /// corrupt-media report from scratch, and returns per-creator tallies.
    pub async fn verify_existing(&self, creators: &[CreatorProfile]) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        let mut report = CorruptReport {
            generated_at: Utc::now().to_rfc3339(),
            ..Default::default()
        };

        for profile in creators {
            let mut creator_summary = CreatorSummary::new(&profile.name);
            let mut corrupt = Vec::new();

            for category in [MediaCategory::Image, MediaCategory::Video] {
                let dir = self.layout.category_dir(&profile.name, category);
                let Ok(entries) = std::fs::read_dir(&dir) else {
                    continue;
                };
                for entry in entries.flatten() {
                    let path = entry.path();
                    if !path.is_file() {
                        continue;
                    }
                    creator_summary.listed += 1;
                    let verification = self.verifier.verify(&path, category).await;
                    creator_summary.record_verification(&verification);
                    if let VerificationStatus::Corrupt(reason) = verification.status {
                        corrupt.push(CorruptEntry {
                            filename: filename_of(&path),
                            path: path.to_string_lossy().to_string(),
                            reason,
                            url: None,
                        });
                    }
                }
            }

            if !corrupt.is_empty() {
                report.creators.insert(profile.name.clone(), corrupt);
            }
            summary.creators.push(creator_summary);
        }

        let path = self.layout.corrupt_report_path();
        if report.is_empty() {
            if path.exists() {
                std::fs::remove_file(&path)
                    .with_context(|| format!("failed to remove corrupt report {path:?}"))?;
            }
        } else {
            let content = serde_json::to_string_pretty(&report)
                .context("failed to serialise corrupt report")?;
            std::fs::write(&path, content)
                .with_context(|| format!("failed to write corrupt report {path:?}"))?;
        }

        Ok(summary)
    }

    fn export_metadata(&self, creator: &str, items: &[crate::catalog::CatalogItem]) -> Result<()> {
        let path = self.layout.metadata_export_path(creator);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {parent:?}"))?;
        }
        let content =
            serde_json::to_string_pretty(items).context("failed to serialise catalog items")?;
        std::fs::write(&path, content)
            .with_context(|| format!("failed to write metadata export {path:?}"))?;
        info!("Exported {} catalog item(s) to {:?}", items.len(), path);
        Ok(())
    }

    fn save_corrections(&self) -> Result<()> {
        if self.ledger.is_empty() {
            return Ok(());
        }
        self.ledger.save(&self.layout.corrections_report_path())
    }

    /// Merge newly found corrupt entries into the existing report, keyed by
    /// path so a re-run does not duplicate entries.
    fn merge_corrupt_report(&self, new_entries: Vec<(String, Vec<CorruptEntry>)>) -> Result<()> {
        if new_entries.is_empty() {
            return Ok(());
        }
        let path = self.layout.corrupt_report_path();
        let mut report = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read corrupt report {path:?}"))?;
            serde_json::from_str(&content).unwrap_or_default()
        } else {
            CorruptReport::default()
        };
        report.generated_at = Utc::now().to_rfc3339();

        for (creator, entries) in new_entries {
            let existing = report.creators.entry(creator).or_default();
            for entry in entries {
                if !existing.iter().any(|e| e.path == entry.path) {
                    existing.push(entry);
                }
            }
        }

        let content =
            serde_json::to_string_pretty(&report).context("failed to serialise corrupt report")?;
        std::fs::write(&path, content)
            .with_context(|| format!("failed to write corrupt report {path:?}"))?;
        Ok(())
    }
}

fn category_from_path(path: &Path) -> MediaCategory {
    let folder = path
        .parent()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    match folder.as_str() {
        "Images" => MediaCategory::Image,
        "Videos" => MediaCategory::Video,
        _ => MediaCategory::Other,
    }
}

fn filename_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::StreamExt;
    use std::sync::Mutex;
    use std::time::Duration;

    use crate::catalog::{
        AssetPage, AssetSource, CatalogClient, CatalogItem, FetchResponse,
    };
    use crate::mirror::limiter::RequestPacer;
    use crate::mirror::memory::MemoryBudget;
    use crate::mirror::models::FetchError;
    use crate::mirror::retry::RetryPolicy;
    use crate::mirror::verifier::{CannedProbe, ProbeError};

    const JPEG_BYTES: &[u8] = b"\xff\xd8\xff\xe0jpeg-payload";

    struct SinglePageClient {
        pages: Mutex<Vec<AssetPage>>,
    }

    #[async_trait]
    impl CatalogClient for SinglePageClient {
        async fn fetch_page(
            &self,
            _creator_id: &str,
            _cursor: Option<&str>,
        ) -> std::result::Result<AssetPage, CatalogError> {
            let mut pages = self.pages.lock().unwrap();
            if pages.is_empty() {
                return Ok(AssetPage {
                    items: vec![],
                    next_cursor: None,
                });
            }
            Ok(pages.remove(0))
        }
    }

    struct UnavailableClient;

    #[async_trait]
    impl CatalogClient for UnavailableClient {
        async fn fetch_page(
            &self,
            _creator_id: &str,
            _cursor: Option<&str>,
        ) -> std::result::Result<AssetPage, CatalogError> {
            Err(CatalogError::Unavailable("503".to_string()))
        }
    }

    /// Serves the same page on every run, the way a stable catalog does.
    struct RepeatingClient {
        urls: Vec<String>,
    }

    #[async_trait]
    impl CatalogClient for RepeatingClient {
        async fn fetch_page(
            &self,
            _creator_id: &str,
            _cursor: Option<&str>,
        ) -> std::result::Result<AssetPage, CatalogError> {
            let items = self
                .urls
                .iter()
                .enumerate()
                .map(|(i, url)| item(i as u64 + 1, url))
                .collect();
            Ok(AssetPage {
                items,
                next_cursor: None,
            })
        }
    }

    struct StaticSource;

    #[async_trait]
    impl AssetSource for StaticSource {
        async fn fetch(&self, _url: &str) -> std::result::Result<FetchResponse, FetchError> {
            let chunks: Vec<std::result::Result<bytes::Bytes, FetchError>> =
                vec![Ok(bytes::Bytes::copy_from_slice(JPEG_BYTES))];
            Ok(FetchResponse {
                content_length: Some(JPEG_BYTES.len() as u64),
                body: futures::stream::iter(chunks).boxed(),
            })
        }
    }

    fn item(id: u64, url: &str) -> CatalogItem {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "url": url,
            "type": "image",
        }))
        .unwrap()
    }

    fn layout(root: &Path) -> FileLayout {
        FileLayout::new(
            root.to_path_buf(),
            vec![".jpg".into(), ".jpeg".into()],
            vec![".mp4".into()],
        )
    }

    fn processor(
        client: Arc<dyn CatalogClient>,
        layout: FileLayout,
        save_metadata: bool,
    ) -> MirrorProcessor {
        processor_with_source(client, Arc::new(StaticSource), layout, save_metadata)
    }

    fn processor_with_source(
        client: Arc<dyn CatalogClient>,
        source: Arc<dyn AssetSource>,
        layout: FileLayout,
        save_metadata: bool,
    ) -> MirrorProcessor {
        let ledger = Arc::new(CorrectionLedger::new());
        let orchestrator = Arc::new(DownloadOrchestrator::new(
            source,
            layout.clone(),
            Arc::new(RequestPacer::disabled()),
            MemoryBudget::new(16 * 1024 * 1024),
            RetryPolicy::new(0, Duration::from_millis(1)),
            ledger.clone(),
            2,
        ));
        let verifier = Arc::new(IntegrityVerifier::new(Arc::new(CannedProbe::new(Err(
            ProbeError::Unavailable,
        )))));
        MirrorProcessor::new(
            AssetResolver::new(client),
            orchestrator,
            verifier,
            ledger,
            layout,
            save_metadata,
        )
    }

    fn profiles(name: &str) -> Vec<CreatorProfile> {
        vec![CreatorProfile {
            name: name.to_string(),
            selection: CategorySelection::default(),
        }]
    }

    #[tokio::test]
    async fn test_full_pipeline_downloads_and_counts() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout(dir.path());
        let client = Arc::new(SinglePageClient {
            pages: Mutex::new(vec![AssetPage {
                items: vec![
                    item(1, "https://cdn.x/k/u/w/one.jpg"),
                    item(2, "https://cdn.x/k/u/w/two.jpg"),
                ],
                next_cursor: None,
            }]),
        });
        let processor = processor(client, layout.clone(), false);

        let summary = processor
            .run(&profiles("alice"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.creators.len(), 1);
        let creator = &summary.creators[0];
        assert_eq!(creator.listed, 2);
        assert_eq!(creator.downloaded, 2);
        // Note: JPEG bytes decode fails (fake payload), so both are corrupt.
        assert_eq!(creator.corrupt, 2);
        assert!(layout.corrupt_report_path().exists());
    }

    #[tokio::test]
    async fn test_ignore_list_prevents_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout(dir.path());
        let creator_root = layout.creator_root("alice");
        std::fs::create_dir_all(&creator_root).unwrap();
        std::fs::write(creator_root.join("ignore.txt"), "one.jpg\n").unwrap();

        let client = Arc::new(SinglePageClient {
            pages: Mutex::new(vec![AssetPage {
                items: vec![item(1, "https://cdn.x/k/u/w/one.jpg")],
                next_cursor: None,
            }]),
        });
        let processor = processor(client, layout, false);

        let summary = processor
            .run(&profiles("alice"), &CancellationToken::new())
            .await
            .unwrap();

        let creator = &summary.creators[0];
        assert_eq!(creator.skipped_ignored, 1);
        assert_eq!(creator.downloaded, 0);
    }

    #[tokio::test]
    async fn test_unavailable_catalog_records_failed_creator() {
        let dir = tempfile::tempdir().unwrap();
        let processor = processor(Arc::new(UnavailableClient), layout(dir.path()), false);

        let summary = processor
            .run(&profiles("alice"), &CancellationToken::new())
            .await
            .unwrap();

        assert!(summary.creators.is_empty());
        assert_eq!(summary.creators_failed.len(), 1);
        assert_eq!(summary.creators_failed[0].0, "alice");
    }

    #[tokio::test]
    async fn test_cdn_auth_rejection_fails_the_creator() {
        struct AuthRejectingSource;

        #[async_trait]
        impl AssetSource for AuthRejectingSource {
            async fn fetch(&self, _url: &str) -> std::result::Result<FetchResponse, FetchError> {
                Err(FetchError::Auth("status 401".into()))
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(RepeatingClient {
            urls: vec!["https://cdn.x/k/u/w/one.jpg".to_string()],
        });
        let processor = processor_with_source(
            client,
            Arc::new(AuthRejectingSource),
            layout(dir.path()),
            false,
        );

        let summary = processor
            .run(&profiles("alice"), &CancellationToken::new())
            .await
            .unwrap();

        assert!(summary.creators.is_empty());
        assert_eq!(summary.creators_failed.len(), 1);
        assert_eq!(summary.creators_failed[0].0, "alice");
        assert!(summary.creators_failed[0].1.contains("authentication"));
    }

    #[tokio::test]
    async fn test_second_run_over_complete_mirror_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout(dir.path());
        let client = Arc::new(RepeatingClient {
            urls: vec![
                "https://cdn.x/k/u/w/one.jpg".to_string(),
                "https://cdn.x/k/u/w/two.jpg".to_string(),
            ],
        });
        let processor = processor(client, layout, false);

        let first = processor
            .run(&profiles("alice"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(first.creators[0].downloaded, 2);

        let second = processor
            .run(&profiles("alice"), &CancellationToken::new())
            .await
            .unwrap();

        let creator = &second.creators[0];
        assert_eq!(creator.listed, 2);
        assert_eq!(creator.downloaded, 0);
        assert_eq!(creator.skipped_existing, 2);
        assert_eq!(creator.corrections, 0);
        assert!(creator.failures.is_empty());
    }

    #[tokio::test]
    async fn test_metadata_export_written_when_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout(dir.path());
        let client = Arc::new(SinglePageClient {
            pages: Mutex::new(vec![AssetPage {
                items: vec![item(7, "https://cdn.x/k/u/w/seven.jpg")],
                next_cursor: None,
            }]),
        });
        let processor = processor(client, layout.clone(), true);

        processor
            .run(&profiles("alice"), &CancellationToken::new())
            .await
            .unwrap();

        let export = layout.metadata_export_path("alice");
        assert!(export.exists());
        let items: Vec<serde_json::Value> =
            serde_json::from_str(&std::fs::read_to_string(export).unwrap()).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["id"], 7);
    }

    #[tokio::test]
    async fn test_verify_existing_builds_report_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout(dir.path());
        let images = layout.category_dir("alice", MediaCategory::Image);
        std::fs::create_dir_all(&images).unwrap();
        std::fs::write(images.join("bad.jpg"), b"definitely-not-a-jpeg").unwrap();

        let processor = processor(
            Arc::new(SinglePageClient {
                pages: Mutex::new(vec![]),
            }),
            layout.clone(),
            false,
        );

        let summary = processor.verify_existing(&profiles("alice")).await.unwrap();

        assert_eq!(summary.creators[0].listed, 1);
        assert_eq!(summary.creators[0].corrupt, 1);
        let report: CorruptReport =
            serde_json::from_str(&std::fs::read_to_string(layout.corrupt_report_path()).unwrap())
                .unwrap();
        assert_eq!(report.total_entries(), 1);
        assert_eq!(report.creators["alice"][0].filename, "bad.jpg");
    }

    #[test]
    fn test_category_from_path() {
        assert_eq!(
            category_from_path(Path::new("/root/alice/Images/a.jpg")),
            MediaCategory::Image
        );
        assert_eq!(
            category_from_path(Path::new("/root/alice/Videos/a.mp4")),
            MediaCategory::Video
        );
        assert_eq!(
            category_from_path(Path::new("/root/alice/Other/a.zip")),
            MediaCategory::Other
        );
    }
}
