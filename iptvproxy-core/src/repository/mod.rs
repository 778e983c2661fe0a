//! Persistence layer
//!
//! Every mutation goes through [`Database::begin_write`], which holds the
//! global write lock for the lifetime of the transaction. Readers share the
//! read half through [`Database::read_lock`].

pub mod http_session;
pub mod recording;
pub mod segment;
pub mod settings;

pub use http_session::HttpSessionRepository;
pub use recording::RecordingRepository;
pub use segment::SegmentRepository;
pub use settings::SettingsRepository;

use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock, RwLockReadGuard};
use uuid::Uuid;

use crate::{Error, Result};

/// Connection pool plus the process-wide write lock.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
    lock: Arc<RwLock<()>>,
}

impl Database {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            lock: Arc::new(RwLock::new(())),
        }
    }

    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Shared lock for reads; blocks while a write transaction is open.
    pub async fn read_lock(&self) -> RwLockReadGuard<'_, ()> {
        self.lock.read().await
    }

    /// Begin a transaction under the exclusive write lock.
    pub async fn begin_write(&self) -> Result<WriteTransaction> {
        let guard = Arc::clone(&self.lock).write_owned().await;
        let tx = self.pool.begin().await?;
        Ok(WriteTransaction { tx, _guard: guard })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Write transaction holding the global write lock until commit or drop.
///
/// Dropping without [`commit`](Self::commit) rolls the transaction back.
pub struct WriteTransaction {
    tx: Transaction<'static, Sqlite>,
    _guard: OwnedRwLockWriteGuard<()>,
}

impl WriteTransaction {
    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    pub async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

impl Deref for WriteTransaction {
    type Target = SqliteConnection;

    fn deref(&self) -> &Self::Target {
        &self.tx
    }
}

impl DerefMut for WriteTransaction {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.tx
    }
}

pub(crate) fn parse_uuid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| Error::Internal(format!("Corrupt id {value}: {e}")))
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_write_lock_excludes_readers() {
        let db = test_support::memory_database().await;

        let tx = db.begin_write().await.unwrap();
        let blocked = tokio::time::timeout(Duration::from_millis(50), db.read_lock()).await;
        assert!(blocked.is_err());

        tx.commit().await.unwrap();
        let reader = tokio::time::timeout(Duration::from_millis(50), db.read_lock()).await;
        assert!(reader.is_ok());
    }
}
