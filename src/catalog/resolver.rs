//! Turns a creator's paged catalog listing into download descriptors.
//!
//! Pagination follows the cursor until the API returns an empty page or no
//! cursor. Video items get their URL rebuilt against the original-quality
//! CDN endpoint, since the listing URL points at a transcoded preview.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{AssetPage, CatalogClient, CatalogError, CatalogItem};
use crate::files;
use crate::mirror::models::{AssetDescriptor, MediaCategory};

/// CDN root serving untranscoded originals.
const CDN_ROOT: &str = "https://image.civitai.com/xG1nkqKTMzGDvpLrqFT7WA";

/// CDN transform requesting the original video at full quality.
const ORIGINAL_VIDEO_TRANSFORM: &str = "original-video=true,quality=100";

/// A creator's fully enumerated catalog.
#[derive(Debug, Clone)]
pub struct ResolvedCatalog {
    pub descriptors: Vec<AssetDescriptor>,
    /// Raw listing items, in listing order, for metadata export.
    pub raw_items: Vec<CatalogItem>,
}

pub struct AssetResolver {
    client: Arc<dyn CatalogClient>,
    max_retries: u32,
    backoff: Duration,
}

impl AssetResolver {
    pub fn new(client: Arc<dyn CatalogClient>) -> Self {
        Self::with_retries(client, 3, Duration::from_secs(2))
    }

    /// Transient listing errors are retried per page with a fixed backoff;
    /// any other error aborts the creator's enumeration.
    pub fn with_retries(client: Arc<dyn CatalogClient>, max_retries: u32, backoff: Duration) -> Self {
        Self {
            client,
            max_retries,
            backoff,
        }
    }

    async fn fetch_page_with_retries(
        &self,
        creator_id: &str,
        cursor: Option<&str>,
    ) -> Result<AssetPage, CatalogError> {
        let mut attempt: u32 = 0;
        loop {
            match self.client.fetch_page(creator_id, cursor).await {
                Ok(page) => return Ok(page),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    warn!(
                        "Listing page for '{}' failed ({}), retrying",
                        creator_id, e
                    );
                    tokio::time::sleep(self.backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Enumerate every published asset of one creator.
    ///
    /// Returns early with whatever was collected so far when `cancel` fires
    /// between pages.
    pub async fn resolve(
        &self,
        creator_id: &str,
        cancel: &CancellationToken,
    ) -> Result<ResolvedCatalog, CatalogError> {
        let mut raw_items = Vec::new();
        let mut cursor: Option<String> = None;
        let mut pages = 0usize;

        loop {
            if cancel.is_cancelled() {
                debug!("Catalog enumeration for '{}' cancelled", creator_id);
                break;
            }

            let page = self
                .fetch_page_with_retries(creator_id, cursor.as_deref())
                .await?;
            pages += 1;
            let last = page.is_last();
            cursor = page.next_cursor.clone();
            raw_items.extend(page.items);

            if last {
                break;
            }
        }

        let descriptors = raw_items
            .iter()
            .map(|item| descriptor_for(creator_id, item))
            .collect::<Vec<_>>();

        info!(
            "Catalog for '{}': {} assets across {} page(s)",
            creator_id,
            descriptors.len(),
            pages
        );

        Ok(ResolvedCatalog {
            descriptors,
            raw_items,
        })
    }
}

fn descriptor_for(creator_id: &str, item: &CatalogItem) -> AssetDescriptor {
    let is_video = item
        .media_type
        .as_deref()
        .is_some_and(|t| t.eq_ignore_ascii_case("video"));

    let source_url = if is_video {
        rebuild_video_url(&item.url, item.id)
    } else {
        item.url.clone()
    };

    let declared_filename = files::filename_from_url(&source_url);
    let declared_category = if is_video {
        MediaCategory::Video
    } else {
        MediaCategory::Image
    };

    AssetDescriptor {
        remote_id: item.id.to_string(),
        source_url,
        declared_filename,
        declared_category,
        creator_id: creator_id.to_string(),
    }
}

/// Rebuild a listing URL into an original-quality video URL.
///
/// Listing URLs have the shape `{root}/{key}/{media_uuid}/{transform}/{name}`;
/// the transform segment is replaced and the name is normalised to the item
/// id with an mp4 extension. URLs that do not match the shape are returned
/// unchanged.
fn rebuild_video_url(listing_url: &str, item_id: u64) -> String {
    let without_scheme = match listing_url.split_once("://") {
        Some((_, rest)) => rest,
        None => return listing_url.to_string(),
    };
    let segments: Vec<&str> = without_scheme.split('/').collect();
    // host / key / uuid / transform / name
    if segments.len() < 5 {
        return listing_url.to_string();
    }
    let media_uuid = segments[2];
    format!("{CDN_ROOT}/{media_uuid}/{ORIGINAL_VIDEO_TRANSFORM}/{item_id}.mp4")
}
