//! Recording repository

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::debug;
use uuid::Uuid;

use super::{parse_uuid, Database};
use crate::models::{Recording, RecordingStatus};
use crate::{Error, Result};

const COLUMNS: &str =
    "id, provider, channel_number, channel_name, program_title, start_utc, stop_utc, status";

#[derive(Clone)]
pub struct RecordingRepository {
    db: Database,
}

impl RecordingRepository {
    #[must_use]
    pub const fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a recording; a duplicate `(provider, channel, start, stop)` yields `AlreadyExists`.
    pub async fn insert(&self, recording: &Recording) -> Result<()> {
        let mut tx = self.db.begin_write().await?;

        sqlx::query(
            r"
            INSERT INTO recording
                (id, provider, channel_number, channel_name, program_title, start_utc, stop_utc, status)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(recording.id.to_string())
        .bind(&recording.provider)
        .bind(i64::from(recording.channel_number))
        .bind(&recording.channel_name)
        .bind(&recording.program_title)
        .bind(recording.start_utc)
        .bind(recording.stop_utc)
        .bind(recording.status.as_str())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!("Inserted recording {}", recording.id);
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Recording>> {
        let _read = self.db.read_lock().await;

        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM recording WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(self.db.pool())
            .await?;

        row.as_ref().map(recording_from_row).transpose()
    }

    /// List recordings ordered by start time, optionally filtered by status
    pub async fn list(&self, status: Option<RecordingStatus>) -> Result<Vec<Recording>> {
        let _read = self.db.read_lock().await;

        let rows = match status {
            Some(status) => {
                sqlx::query(&format!(
                    "SELECT {COLUMNS} FROM recording WHERE status = ? ORDER BY start_utc, id"
                ))
                .bind(status.as_str())
                .fetch_all(self.db.pool())
                .await?
            }
            None => {
                sqlx::query(&format!("SELECT {COLUMNS} FROM recording ORDER BY start_utc, id"))
                    .fetch_all(self.db.pool())
                    .await?
            }
        };

        rows.iter().map(recording_from_row).collect()
    }

    pub async fn update_status(&self, id: Uuid, status: RecordingStatus) -> Result<bool> {
        let mut tx = self.db.begin_write().await?;

        let result = sqlx::query("UPDATE recording SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        debug!("Recording {} is now {}", id, status);
        Ok(result.rows_affected() > 0)
    }

    /// Delete a recording together with its segment rows
    pub async fn delete(&self, id: Uuid) -> Result<bool> {
        let mut tx = self.db.begin_write().await?;

        sqlx::query("DELETE FROM segment WHERE recording_id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM recording WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        debug!("Deleted recording {}", id);
        Ok(result.rows_affected() > 0)
    }
}

fn recording_from_row(row: &SqliteRow) -> Result<Recording> {
    let id: String = row.try_get("id")?;
    let channel_number: i64 = row.try_get("channel_number")?;
    let status: String = row.try_get("status")?;
    let start_utc: DateTime<Utc> = row.try_get("start_utc")?;
    let stop_utc: DateTime<Utc> = row.try_get("stop_utc")?;

    Ok(Recording {
        id: parse_uuid(&id)?,
        provider: row.try_get("provider")?,
        channel_number: u32::try_from(channel_number)
            .map_err(|_| Error::Internal(format!("Corrupt channel number {channel_number}")))?,
        channel_name: row.try_get("channel_name")?,
        program_title: row.try_get("program_title")?,
        start_utc,
        stop_utc,
        status: status.parse()?,
    })
}
