//! Photo search service integration

pub mod client;
pub mod paging;
pub mod types;

pub use client::{FlickrClient, FlickrError};
pub use paging::{BoundingBox, MAX_PAGES, MAX_RESULTS, PER_PAGE};
pub use types::{PhotoItem, PhotoPage};
