//! # Virtual Tourist Common Library
//!
//! Shared code for the Virtual Tourist workspace including:
//! - Entity model (pins, photos, tier tags)
//! - Event types and the EventBus
//! - SQLite schema and row-level queries
//! - Configuration loading and root folder resolution
//! - Logging initialisation

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;

pub use error::{Error, Result};
pub use models::{Coordinate, Photo, PhotoId, Pin, PinId, TierKind};
