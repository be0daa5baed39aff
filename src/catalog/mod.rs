//! Catalog API access: listing a creator's published media and fetching
//! the underlying asset bytes.
//!
//! Both concerns are behind traits so the pipeline can be driven by test
//! doubles without a network.

pub mod client;
pub mod resolver;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::mirror::models::FetchError;

pub use client::HttpCatalogClient;
pub use resolver::AssetResolver;

/// Errors from catalog page listing.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The catalog API rejected our credentials.
    #[error("catalog authentication failed: {0}")]
    Auth(String),

    /// The catalog rejected the request outright (4xx); retrying cannot
    /// help.
    #[error("catalog unavailable: {0}")]
    Unavailable(String),

    /// A timeout or server-side error; worth retrying.
    #[error("transient catalog error: {0}")]
    Transient(String),

    /// The catalog answered but the payload did not parse.
    #[error("malformed catalog response: {0}")]
    Malformed(String),
}

impl CatalogError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, CatalogError::Transient(_))
    }
}

/// One raw catalog item as returned by the listing API.
///
/// Fields beyond the ones the pipeline needs are retained in `extra` so a
/// metadata export reproduces the listing payload verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: u64,
    pub url: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// One page of a creator's catalog listing.
#[derive(Debug, Clone)]
pub struct AssetPage {
    pub items: Vec<CatalogItem>,
    pub next_cursor: Option<String>,
}

impl AssetPage {
    pub fn is_last(&self) -> bool {
        self.items.is_empty() || self.next_cursor.is_none()
    }
}

/// Paged listing of a creator's published media.
#[async_trait]
pub trait CatalogClient: Send + Sync {
    async fn fetch_page(
        &self,
        creator_id: &str,
        cursor: Option<&str>,
    ) -> Result<AssetPage, CatalogError>;
}

/// Byte stream of one asset body plus the advertised size, if any.
pub struct FetchResponse {
    pub content_length: Option<u64>,
    pub body: Pin<Box<dyn Stream<Item = Result<bytes::Bytes, FetchError>> + Send>>,
}

/// Streaming retrieval of asset bytes by URL.
#[async_trait]
pub trait AssetSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchResponse, FetchError>;
}
