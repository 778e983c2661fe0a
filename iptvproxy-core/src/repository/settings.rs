//! Settings repository for the key/value store

use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::debug;

use super::Database;
use crate::models::Setting;
use crate::Result;

#[derive(Clone)]
pub struct SettingsRepository {
    db: Database,
}

impl SettingsRepository {
    #[must_use]
    pub const fn new(db: Database) -> Self {
        Self { db }
    }

    /// Get a single setting by name
    pub async fn get(&self, name: &str) -> Result<Option<Setting>> {
        let _read = self.db.read_lock().await;

        let row = sqlx::query("SELECT name, value FROM setting WHERE name = ?")
            .bind(name)
            .fetch_optional(self.db.pool())
            .await?;

        row.as_ref().map(setting_from_row).transpose()
    }

    /// Insert or replace a setting
    pub async fn upsert(&self, setting: &Setting) -> Result<()> {
        let mut tx = self.db.begin_write().await?;

        sqlx::query(
            r"
            INSERT INTO setting (name, value) VALUES (?, ?)
            ON CONFLICT(name) DO UPDATE SET value = excluded.value
            ",
        )
        .bind(&setting.name)
        .bind(&setting.value)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!("Updated setting '{}'", setting.name);
        Ok(())
    }

    pub async fn delete(&self, name: &str) -> Result<bool> {
        let mut tx = self.db.begin_write().await?;

        let result = sqlx::query("DELETE FROM setting WHERE name = ?")
            .bind(name)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }
}

fn setting_from_row(row: &SqliteRow) -> Result<Setting> {
    Ok(Setting {
        name: row.try_get("name")?,
        value: row.try_get("value")?,
    })
}
