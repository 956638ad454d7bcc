//! Database schema and row-level queries
//!
//! Only the persisting tier of the object store talks to SQLite; everything
//! else reads the in-memory tiers.

pub mod init;
pub mod photos;
pub mod pins;

pub use init::*;
