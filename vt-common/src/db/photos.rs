//! Photo table operations

use crate::models::{PhotoId, PhotoRecord, PinId};
use crate::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite};

/// Insert or update a photo row
///
/// Callers only hand over photos that already carry image bytes; the owning
/// pin row must exist.
pub async fn upsert_photo<'e, E>(executor: E, photo: &PhotoRecord) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO photos (guid, pin_guid, title, image, created_at, updated_at)
        VALUES (?, ?, ?, ?, CURRENT_TIMESTAMP, CURRENT_TIMESTAMP)
        ON CONFLICT(guid) DO UPDATE SET
            title = excluded.title,
            image = excluded.image,
            updated_at = CURRENT_TIMESTAMP
        "#,
    )
    .bind(photo.id.to_string())
    .bind(photo.pin.to_string())
    .bind(&photo.title)
    .bind(photo.image.as_deref())
    .execute(executor)
    .await?;

    Ok(())
}

pub async fn delete_photo<'e, E>(executor: E, photo_id: PhotoId) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query("DELETE FROM photos WHERE guid = ?")
        .bind(photo_id.to_string())
        .execute(executor)
        .await?;

    Ok(())
}

/// Load every photo
pub async fn load_all_photos<'e, E>(executor: E) -> Result<Vec<PhotoRecord>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query(
        r#"
        SELECT guid, pin_guid, title, image
        FROM photos
        ORDER BY created_at, rowid
        "#,
    )
    .fetch_all(executor)
    .await?;

    rows.iter().map(photo_from_row).collect()
}

/// Load the photos owned by one pin
pub async fn load_photos_for_pin<'e, E>(executor: E, pin_id: PinId) -> Result<Vec<PhotoRecord>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query(
        r#"
        SELECT guid, pin_guid, title, image
        FROM photos
        WHERE pin_guid = ?
        ORDER BY created_at, rowid
        "#,
    )
    .bind(pin_id.to_string())
    .fetch_all(executor)
    .await?;

    rows.iter().map(photo_from_row).collect()
}

pub async fn count_photos<'e, E>(executor: E) -> Result<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM photos")
        .fetch_one(executor)
        .await?;
    Ok(count)
}

fn photo_from_row(row: &SqliteRow) -> Result<PhotoRecord> {
    let guid: String = row.get("guid");
    let id = PhotoId::parse(&guid)
        .map_err(|e| Error::CorruptRecord(format!("Bad photo guid {:?}: {}", guid, e)))?;

    let pin_guid: String = row.get("pin_guid");
    let pin = PinId::parse(&pin_guid)
        .map_err(|e| Error::CorruptRecord(format!("Bad pin guid {:?}: {}", pin_guid, e)))?;

    Ok(PhotoRecord {
        id,
        pin,
        title: row.get("title"),
        image: row.get("image"),
    })
}
