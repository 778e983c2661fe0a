//! Segment index of recordings

use iptvproxy_manifest::VodSegment;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use super::{parse_uuid, Database};
use crate::models::{NewSegment, Segment};
use crate::Result;

#[derive(Clone)]
pub struct SegmentRepository {
    db: Database,
}

impl SegmentRepository {
    #[must_use]
    pub const fn new(db: Database) -> Self {
        Self { db }
    }

    /// Append a segment; returns its id, which is greater than every earlier id.
    pub async fn insert(&self, segment: &NewSegment) -> Result<i64> {
        let serialized = serde_json::to_vec(&segment.manifest_segment)?;
        let mut tx = self.db.begin_write().await?;

        let result = sqlx::query(
            r"
            INSERT INTO segment (name, recording_id, serialized_segment, directory_path)
            VALUES (?, ?, ?, ?)
            ",
        )
        .bind(&segment.name)
        .bind(segment.recording_id.to_string())
        .bind(serialized)
        .bind(&segment.directory_path)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(result.last_insert_rowid())
    }

    /// Segments of a recording in capture order
    pub async fn list_for_recording(&self, recording_id: Uuid) -> Result<Vec<Segment>> {
        let _read = self.db.read_lock().await;

        let rows = sqlx::query(
            r"
            SELECT id, name, recording_id, serialized_segment, directory_path
            FROM segment
            WHERE recording_id = ?
            ORDER BY id
            ",
        )
        .bind(recording_id.to_string())
        .fetch_all(self.db.pool())
        .await?;

        rows.iter().map(segment_from_row).collect()
    }

    pub async fn find_by_name(&self, recording_id: Uuid, name: &str) -> Result<Option<Segment>> {
        let _read = self.db.read_lock().await;

        let row = sqlx::query(
            r"
            SELECT id, name, recording_id, serialized_segment, directory_path
            FROM segment
            WHERE recording_id = ? AND name = ?
            ",
        )
        .bind(recording_id.to_string())
        .bind(name)
        .fetch_optional(self.db.pool())
        .await?;

        row.as_ref().map(segment_from_row).transpose()
    }

    pub async fn count_for_recording(&self, recording_id: Uuid) -> Result<i64> {
        let _read = self.db.read_lock().await;

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM segment WHERE recording_id = ?")
            .bind(recording_id.to_string())
            .fetch_one(self.db.pool())
            .await?;

        Ok(count)
    }
}

fn segment_from_row(row: &SqliteRow) -> Result<Segment> {
    let recording_id: String = row.try_get("recording_id")?;
    let serialized: Vec<u8> = row.try_get("serialized_segment")?;
    let manifest_segment: VodSegment = serde_json::from_slice(&serialized)?;

    Ok(Segment {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        recording_id: parse_uuid(&recording_id)?,
        manifest_segment,
        directory_path: row.try_get("directory_path")?,
    })
}
