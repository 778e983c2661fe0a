//! HTTP login sessions

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::debug;
use uuid::Uuid;

use super::{parse_uuid, Database};
use crate::models::HttpSession;
use crate::Result;

#[derive(Clone)]
pub struct HttpSessionRepository {
    db: Database,
}

impl HttpSessionRepository {
    #[must_use]
    pub const fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn insert(&self, session: &HttpSession) -> Result<()> {
        let mut tx = self.db.begin_write().await?;

        sqlx::query(
            r"
            INSERT INTO http_session (id, client_ip_address, user_agent, expiry_utc, last_access_utc)
            VALUES (?, ?, ?, ?, ?)
            ",
        )
        .bind(session.id.to_string())
        .bind(&session.client_ip_address)
        .bind(&session.user_agent)
        .bind(session.expiry_utc)
        .bind(session.last_access_utc)
        .execute(&mut *tx)
        .await?;

        tx.commit().await
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<HttpSession>> {
        let _read = self.db.read_lock().await;

        let row = sqlx::query(
            r"
            SELECT id, client_ip_address, user_agent, expiry_utc, last_access_utc
            FROM http_session
            WHERE id = ?
            ",
        )
        .bind(id.to_string())
        .fetch_optional(self.db.pool())
        .await?;

        row.as_ref().map(session_from_row).transpose()
    }

    /// Slide the last-access timestamp of a session
    pub async fn touch(&self, id: Uuid, now: DateTime<Utc>) -> Result<()> {
        let mut tx = self.db.begin_write().await?;

        sqlx::query("UPDATE http_session SET last_access_utc = ? WHERE id = ?")
            .bind(now)
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;

        tx.commit().await
    }

    pub async fn delete(&self, id: Uuid) -> Result<()> {
        let mut tx = self.db.begin_write().await?;

        sqlx::query("DELETE FROM http_session WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;

        tx.commit().await
    }

    /// Remove every session whose expiry lies before `now`; returns how many were removed.
    pub async fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut tx = self.db.begin_write().await?;

        let rows = sqlx::query("SELECT id, expiry_utc FROM http_session")
            .fetch_all(&mut *tx)
            .await?;

        let mut expired = Vec::new();
        for row in &rows {
            let expiry_utc: DateTime<Utc> = row.try_get("expiry_utc")?;
            if now > expiry_utc {
                expired.push(row.try_get::<String, _>("id")?);
            }
        }

        for id in &expired {
            sqlx::query("DELETE FROM http_session WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        if !expired.is_empty() {
            debug!("Deleted {} expired HTTP sessions", expired.len());
        }
        Ok(expired.len())
    }
}

fn session_from_row(row: &SqliteRow) -> Result<HttpSession> {
    let id: String = row.try_get("id")?;

    Ok(HttpSession {
        id: parse_uuid(&id)?,
        client_ip_address: row.try_get("client_ip_address")?,
        user_agent: row.try_get("user_agent")?,
        expiry_utc: row.try_get("expiry_utc")?,
        last_access_utc: row.try_get("last_access_utc")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_support::memory_database;
    use chrono::Duration;

    #[tokio::test]
    async fn test_insert_touch_get() {
        let repo = HttpSessionRepository::new(memory_database().await);
        let session = HttpSession::new("10.0.0.2", "Kodi");

        repo.insert(&session).await.unwrap();
        let later = session.last_access_utc + Duration::minutes(5);
        repo.touch(session.id, later).await.unwrap();

        let loaded = repo.get(session.id).await.unwrap().unwrap();
        assert_eq!(loaded.last_access_utc, later);
        assert_eq!(loaded.expiry_utc, session.expiry_utc);
    }

    #[tokio::test]
    async fn test_delete_expired() {
        let repo = HttpSessionRepository::new(memory_database().await);
        let fresh = HttpSession::new("10.0.0.2", "Kodi");
        let mut stale = HttpSession::new("10.0.0.3", "VLC");
        stale.expiry_utc = Utc::now() - Duration::hours(1);

        repo.insert(&fresh).await.unwrap();
        repo.insert(&stale).await.unwrap();

        assert_eq!(repo.delete_expired(Utc::now()).await.unwrap(), 1);
        assert!(repo.get(stale.id).await.unwrap().is_none());
        assert!(repo.get(fresh.id).await.unwrap().is_some());
    }
}
