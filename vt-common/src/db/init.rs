//! Database initialization
//!
//! Creates the database file on first run and makes sure the schema exists.
//! Safe to call on an existing database; every statement is idempotent.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Open (creating if needed) the object store database
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Per-connection settings: every pooled connection needs foreign keys on
    // for photo rows to cascade with their pin, and WAL lets the loader read
    // while the persisting tier writes.
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(5000));

    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema(&pool).await?;

    Ok(pool)
}

/// Create the pins and photos tables
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_pins_table(pool).await?;
    create_photos_table(pool).await?;
    debug!("Database schema ready (pins, photos)");
    Ok(())
}

async fn create_pins_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pins (
            guid TEXT PRIMARY KEY,
            latitude REAL NOT NULL,
            longitude REAL NOT NULL,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (latitude, longitude)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_photos_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS photos (
            guid TEXT PRIMARY KEY,
            pin_guid TEXT NOT NULL REFERENCES pins(guid) ON DELETE CASCADE,
            title TEXT NOT NULL DEFAULT '',
            image BLOB,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_photos_pin ON photos(pin_guid)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Files SQLite may leave next to the database in WAL mode
pub fn database_files(db_path: &Path) -> Vec<PathBuf> {
    let mut files = vec![db_path.to_path_buf()];
    for suffix in ["-wal", "-shm"] {
        let mut name = db_path.as_os_str().to_owned();
        name.push(suffix);
        files.push(PathBuf::from(name));
    }
    files
}

/// Delete the database file and its WAL/SHM side files
///
/// The pool using the file must be closed first.
pub fn remove_database_files(db_path: &Path) -> Result<()> {
    for file in database_files(db_path) {
        match std::fs::remove_file(&file) {
            Ok(()) => debug!("Removed {}", file.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
