//! Errors raised by the shared Virtual Tourist crate

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// SQLite failure while opening, migrating or querying the object store
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Root folder, config or state file access
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Unreadable or invalid TOML configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// A stored row that no longer decodes into a model (bad guid)
    #[error("Corrupt record: {0}")]
    CorruptRecord(String),

    /// App state could not be serialised to TOML
    #[error("State encoding error: {0}")]
    StateEncoding(#[from] toml::ser::Error),
}
