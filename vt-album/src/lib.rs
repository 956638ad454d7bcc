//! # Virtual Tourist album core
//!
//! Pins, their photo albums and the machinery that keeps them:
//! - `store`: three-tier object store over SQLite
//! - `registry`: in-memory lookup of pins by coordinate
//! - `flickr` and `acquisition`: fetching a page of photos for a pin
//! - `expected_count`: how many photos the viewed pin should end up with
//! - `context`: the [`AppContext`] tying it all together
//!
//! There is no UI here. Callers drive [`AppContext`] and subscribe to its
//! event bus for progress.

pub mod acquisition;
pub mod app_state;
pub mod context;
pub mod error;
pub mod expected_count;
pub mod flickr;
pub mod registry;
pub mod store;

pub use context::AppContext;
pub use error::{AcquisitionError, StoreError, StoreResult, TouristError, TouristResult};
pub use store::TieredStore;
