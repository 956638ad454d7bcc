//! Flickr REST client
//!
//! Thin wrapper over `flickr.photos.search` and plain image downloads.
//! Nothing here knows about pins or the store.

use super::paging::{BoundingBox, PER_PAGE};
use super::types::{PhotoPage, SearchEnvelope};
use std::time::Duration;
use thiserror::Error;
use vt_common::config::FlickrConfig;

const REST_PATH: &str = "/services/rest";
const SEARCH_METHOD: &str = "flickr.photos.search";
const USER_AGENT: &str = concat!("VirtualTourist/", env!("CARGO_PKG_VERSION"));

/// Flickr client errors
#[derive(Debug, Error)]
pub enum FlickrError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP status {0}")]
    Status(u16),

    /// The service answered with `stat: "fail"`
    #[error("API error {code}: {message}")]
    Api { code: i64, message: String },

    #[error("Parse error: {0}")]
    Parse(String),
}

/// Flickr API client
pub struct FlickrClient {
    http_client: reqwest::Client,
    api_key: String,
    endpoint: String,
}

impl FlickrClient {
    pub fn new(config: &FlickrConfig) -> Result<Self, FlickrError> {
        Self::with_timeout(config, config.timeout())
    }

    pub fn with_timeout(config: &FlickrConfig, timeout: Duration) -> Result<Self, FlickrError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| FlickrError::Network(e.to_string()))?;

        if config.api_key.is_empty() {
            tracing::warn!("No Flickr API key configured; searches will be rejected");
        }

        Ok(Self {
            http_client,
            api_key: config.api_key.clone(),
            endpoint: format!("{}{}", config.base_url.trim_end_matches('/'), REST_PATH),
        })
    }

    /// Full REST endpoint URL
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Run one photo search; without `page` the service returns page 1
    pub async fn search(
        &self,
        bbox: &BoundingBox,
        page: Option<u32>,
    ) -> Result<PhotoPage, FlickrError> {
        let bbox = bbox.to_string();
        let per_page = PER_PAGE.to_string();
        let page = page.map(|p| p.to_string());

        let mut params: Vec<(&str, &str)> = vec![
            ("method", SEARCH_METHOD),
            ("api_key", self.api_key.as_str()),
            ("bbox", bbox.as_str()),
            ("extras", "url_m"),
            ("format", "json"),
            ("nojsoncallback", "1"),
            ("safe_search", "1"),
            ("per_page", per_page.as_str()),
        ];
        if let Some(page) = &page {
            params.push(("page", page.as_str()));
        }

        tracing::debug!(bbox = %bbox, page = ?page, "Searching Flickr");

        let response = self
            .http_client
            .get(&self.endpoint)
            .query(&params)
            .send()
            .await
            .map_err(|e| FlickrError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FlickrError::Status(status.as_u16()));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| FlickrError::Network(e.to_string()))?;
        let envelope: SearchEnvelope =
            serde_json::from_slice(&body).map_err(|e| FlickrError::Parse(e.to_string()))?;

        if envelope.stat.as_deref() == Some("fail") {
            let code = envelope.code.unwrap_or_default();
            let message = envelope
                .message
                .unwrap_or_else(|| "request rejected".to_string());
            tracing::warn!(code, message = %message, "Flickr rejected search");
            return Err(FlickrError::Api { code, message });
        }

        envelope
            .photos
            .ok_or_else(|| FlickrError::Parse("missing photos".to_string()))
    }

    /// Download raw image bytes
    pub async fn fetch_image(&self, url: &str) -> Result<Vec<u8>, FlickrError> {
        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| FlickrError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FlickrError::Status(status.as_u16()));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| FlickrError::Network(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}
