//! HTTP client for the catalog listing API and the media CDN.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use tracing::debug;

use super::{AssetPage, AssetSource, CatalogClient, CatalogError, CatalogItem, FetchResponse};
use crate::mirror::models::FetchError;

/// Default public catalog API root.
pub const DEFAULT_API_BASE: &str = "https://civitai.com/api/v1";

/// Items requested per listing page.
const PAGE_SIZE: u32 = 200;

#[derive(Debug, Deserialize)]
struct ListingResponse {
    #[serde(default)]
    items: Vec<CatalogItem>,
    #[serde(default)]
    metadata: ListingMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct ListingMetadata {
    #[serde(rename = "nextCursor")]
    next_cursor: Option<String>,
}

/// Client for the catalog API and its CDN, one instance per run.
pub struct HttpCatalogClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    include_nsfw: bool,
}

impl HttpCatalogClient {
    /// # Arguments
    /// * `base_url` - Catalog API root (e.g. [`DEFAULT_API_BASE`])
    /// * `api_key` - Optional bearer token for authenticated listings
    /// * `timeout_sec` - Per-request timeout in seconds
    /// * `include_nsfw` - Whether listings include age-restricted media
    pub fn new(
        base_url: String,
        api_key: Option<String>,
        timeout_sec: u64,
        include_nsfw: bool,
    ) -> Result<Self, CatalogError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_sec))
            .connect_timeout(Duration::from_secs(timeout_sec.min(30)))
            .build()
            .map_err(|e| CatalogError::Transient(e.to_string()))?;

        let base_url = base_url.trim_end_matches('/').to_string();

        Ok(Self {
            client,
            base_url,
            api_key,
            include_nsfw,
        })
    }

    fn with_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl CatalogClient for HttpCatalogClient {
    async fn fetch_page(
        &self,
        creator_id: &str,
        cursor: Option<&str>,
    ) -> Result<AssetPage, CatalogError> {
        let url = format!("{}/images", self.base_url);
        let limit = PAGE_SIZE.to_string();
        let mut request = self
            .client
            .get(&url)
            .query(&[("username", creator_id), ("limit", limit.as_str())]);
        if self.include_nsfw {
            request = request.query(&[("nsfw", "X")]);
        }
        if let Some(cursor) = cursor {
            request = request.query(&[("cursor", cursor)]);
        }

        let response = self.with_auth(request).send().await.map_err(|e| {
            if e.is_timeout() {
                CatalogError::Transient(e.to_string())
            } else {
                CatalogError::Unavailable(e.to_string())
            }
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(CatalogError::Auth(format!("status {status}")));
        }
        if status.is_server_error() {
            return Err(CatalogError::Transient(format!(
                "listing for '{creator_id}' returned status {status}"
            )));
        }
        if !status.is_success() {
            return Err(CatalogError::Unavailable(format!(
                "listing for '{creator_id}' returned status {status}"
            )));
        }

        let listing: ListingResponse = response
            .json()
            .await
            .map_err(|e| CatalogError::Malformed(e.to_string()))?;

        debug!(
            "Fetched catalog page for '{}': {} items, next cursor: {:?}",
            creator_id,
            listing.items.len(),
            listing.metadata.next_cursor
        );

        Ok(AssetPage {
            items: listing.items,
            next_cursor: listing.metadata.next_cursor,
        })
    }
}

#[async_trait]
impl AssetSource for HttpCatalogClient {
    async fn fetch(&self, url: &str) -> Result<FetchResponse, FetchError> {
        let response = self
            .with_auth(self.client.get(url))
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound(url.to_string()));
        }
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(FetchError::Auth(format!("status {status}")));
        }
        if !status.is_success() {
            return Err(FetchError::Connection(format!("status {status}")));
        }

        let content_length = response.content_length();
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(classify_reqwest_error))
            .boxed();

        Ok(FetchResponse {
            content_length,
            body,
        })
    }
}

fn classify_reqwest_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout(e.to_string())
    } else {
        FetchError::Connection(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_slash_removal() {
        let client =
            HttpCatalogClient::new("https://example.com/api/v1/".to_string(), None, 60, true)
                .unwrap();
        assert_eq!(client.base_url(), "https://example.com/api/v1");
    }

    #[test]
    fn test_listing_response_parses_camel_case_cursor() {
        let raw = r#"{
            "items": [
                {"id": 101, "url": "https://cdn.example.com/a/b/c/101.jpeg", "type": "image"},
                {"id": 102, "url": "https://cdn.example.com/a/b/c/102.mp4", "type": "video"}
            ],
            "metadata": {"nextCursor": "102|0"}
        }"#;
        let parsed: ListingResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.items.len(), 2);
        assert_eq!(parsed.items[1].media_type.as_deref(), Some("video"));
        assert_eq!(parsed.metadata.next_cursor.as_deref(), Some("102|0"));
    }

    #[test]
    fn test_listing_response_tolerates_missing_fields() {
        let parsed: ListingResponse = serde_json::from_str(r#"{"items": []}"#).unwrap();
        assert!(parsed.items.is_empty());
        assert!(parsed.metadata.next_cursor.is_none());
    }
}
