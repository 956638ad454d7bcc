//! Search response shapes
//!
//! The service is loose about numeric fields: `total` arrives as a string,
//! `pages` usually as a number. Both forms are accepted everywhere.

use super::client::FlickrError;
use serde::{Deserialize, Serialize};

/// Number that may be encoded as a JSON number or a numeric string
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Numeric {
    Number(i64),
    Text(String),
}

impl Numeric {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Numeric::Number(n) => Some(*n),
            Numeric::Text(s) => s.trim().parse().ok(),
        }
    }
}

/// Top-level search response
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SearchEnvelope {
    /// `"ok"` or `"fail"`
    #[serde(default)]
    pub stat: Option<String>,
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub photos: Option<PhotoPage>,
}

/// The `photos` object of a search response
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PhotoPage {
    #[serde(default)]
    pub page: Option<Numeric>,
    #[serde(default)]
    pub pages: Option<Numeric>,
    #[serde(default)]
    pub total: Option<Numeric>,
    #[serde(default)]
    pub photo: Option<Vec<PhotoItem>>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PhotoItem {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: String,
    /// Medium-size image URL, present when `extras=url_m` was requested
    #[serde(default)]
    pub url_m: Option<String>,
}

impl PhotoPage {
    /// Server-reported page count, if it was readable
    pub fn page_count(&self) -> Option<i64> {
        self.pages.as_ref().and_then(Numeric::as_i64)
    }

    /// Result count for the whole query
    pub fn total(&self) -> Result<u64, FlickrError> {
        let raw = self
            .total
            .as_ref()
            .ok_or_else(|| FlickrError::Parse("missing photos.total".to_string()))?;
        raw.as_i64()
            .and_then(|n| u64::try_from(n).ok())
            .ok_or_else(|| FlickrError::Parse(format!("invalid photos.total: {:?}", raw)))
    }

    pub fn items(&self) -> Result<&[PhotoItem], FlickrError> {
        self.photo
            .as_deref()
            .ok_or_else(|| FlickrError::Parse("missing photos.photo".to_string()))
    }
}
