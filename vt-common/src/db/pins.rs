//! Pin table operations

use crate::models::{Coordinate, PinId, PinRecord};
use crate::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite};

/// Insert a pin row
///
/// Coordinates never change after creation, so an existing row with the same
/// guid is left alone. A different guid at the same coordinate violates the
/// `UNIQUE (latitude, longitude)` constraint and fails.
pub async fn upsert_pin<'e, E>(executor: E, pin: &PinRecord) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO pins (guid, latitude, longitude)
        VALUES (?, ?, ?)
        ON CONFLICT(guid) DO NOTHING
        "#,
    )
    .bind(pin.id.to_string())
    .bind(pin.coordinate.latitude)
    .bind(pin.coordinate.longitude)
    .execute(executor)
    .await?;

    Ok(())
}

/// Delete a pin row; its photos go with it through `ON DELETE CASCADE`
pub async fn delete_pin<'e, E>(executor: E, pin_id: PinId) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query("DELETE FROM pins WHERE guid = ?")
        .bind(pin_id.to_string())
        .execute(executor)
        .await?;

    Ok(())
}

/// Load every pin in creation order
pub async fn load_all_pins<'e, E>(executor: E) -> Result<Vec<PinRecord>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query(
        r#"
        SELECT guid, latitude, longitude
        FROM pins
        ORDER BY created_at, rowid
        "#,
    )
    .fetch_all(executor)
    .await?;

    rows.iter().map(pin_from_row).collect()
}

pub async fn count_pins<'e, E>(executor: E) -> Result<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pins")
        .fetch_one(executor)
        .await?;
    Ok(count)
}

fn pin_from_row(row: &SqliteRow) -> Result<PinRecord> {
    let guid: String = row.get("guid");
    let id = PinId::parse(&guid)
        .map_err(|e| Error::CorruptRecord(format!("Bad pin guid {:?}: {}", guid, e)))?;

    Ok(PinRecord {
        id,
        coordinate: Coordinate::new(row.get("latitude"), row.get("longitude")),
    })
}
