//! Error types for vt-album

use crate::flickr::FlickrError;
use thiserror::Error;
use vt_common::models::TierKind;

/// Object store errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Durable write or load failed
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// No object with this identity exists in the target tier
    #[error("No {entity} {id} in the {tier} tier")]
    IdentityResolution {
        entity: &'static str,
        id: String,
        tier: TierKind,
    },

    /// A handle from another tier was used to build a relationship
    #[error("{entity} handle belongs to the {found} tier, expected {expected}; resolve it first")]
    ForeignTier {
        entity: &'static str,
        expected: TierKind,
        found: TierKind,
    },

    /// Callers never address the persisting tier directly
    #[error("The {0} tier is not accessible to callers")]
    TierNotAccessible(TierKind),

    /// The background worker or persisting task has stopped
    #[error("Store worker stopped: {0}")]
    WorkerStopped(&'static str),

    #[error("Common error: {0}")]
    Common(#[from] vt_common::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Photo batch acquisition errors
///
/// Every variant maps to a human-readable reason via [`AcquisitionError::user_message`];
/// raw transport errors never reach the collaborator.
#[derive(Debug, Error)]
pub enum AcquisitionError {
    /// Network failure, timeout, bad status or remote rejection
    #[error("Transport error: {0}")]
    Transport(String),

    /// Response body was not the expected shape
    #[error("Parse error: {0}")]
    Parse(String),

    /// The search reported no usable pages
    #[error("Pagination error: {0}")]
    Pagination(String),

    /// The target pin vanished between validation and use
    #[error("Identity resolution failed: {0}")]
    IdentityResolution(String),

    #[error("Store error: {0}")]
    Store(StoreError),

    /// Another acquisition is still running
    #[error("A photo batch is already being fetched")]
    InFlight,
}

impl AcquisitionError {
    /// Reason string suitable for showing to a user
    pub fn user_message(&self) -> String {
        match self {
            AcquisitionError::Transport(_) => {
                "Could not reach the photo service. Check your connection and try again.".to_string()
            }
            AcquisitionError::Parse(_) => {
                "The photo service sent an unexpected response.".to_string()
            }
            AcquisitionError::Pagination(_) => "No photos were found for this location.".to_string(),
            AcquisitionError::IdentityResolution(_) => {
                "This location no longer exists.".to_string()
            }
            AcquisitionError::Store(_) => "Photos could not be saved.".to_string(),
            AcquisitionError::InFlight => {
                "A new collection is already being downloaded.".to_string()
            }
        }
    }
}

impl From<FlickrError> for AcquisitionError {
    fn from(err: FlickrError) -> Self {
        match err {
            FlickrError::Parse(msg) => AcquisitionError::Parse(msg),
            other => AcquisitionError::Transport(other.to_string()),
        }
    }
}

impl From<StoreError> for AcquisitionError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::IdentityResolution { .. } => {
                AcquisitionError::IdentityResolution(err.to_string())
            }
            other => AcquisitionError::Store(other),
        }
    }
}

/// Errors surfaced by [`crate::AppContext`]
#[derive(Debug, Error)]
pub enum TouristError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Acquisition(#[from] AcquisitionError),

    #[error(transparent)]
    Flickr(#[from] FlickrError),

    #[error("Common error: {0}")]
    Common(#[from] vt_common::Error),
}

pub type TouristResult<T> = Result<T, TouristError>;
