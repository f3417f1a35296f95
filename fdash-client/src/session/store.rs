//! Durable session storage
//!
//! The session is the only client-side state that outlives the process. It is
//! persisted as a single JSON value so the access token and tenant id are
//! always written and removed together.

use super::Session;
use async_trait::async_trait;
use fdash_common::db::settings;
use fdash_common::{Error, Result};
use sqlx::SqlitePool;
use std::sync::Mutex;
use tracing::warn;

/// Settings key holding the serialized session
pub const SESSION_KEY: &str = "session";

/// Key-value backing store for the session
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load the persisted session, if any
    async fn load(&self) -> Result<Option<Session>>;

    /// Persist the session, replacing any previous one
    async fn save(&self, session: &Session) -> Result<()>;

    /// Remove the persisted session (no-op if absent)
    async fn clear(&self) -> Result<()>;
}

/// Session store backed by the SQLite `settings` table
pub struct SqliteSessionStore {
    db: SqlitePool,
}

impl SqliteSessionStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn load(&self) -> Result<Option<Session>> {
        let Some(raw) = settings::get_setting(&self.db, SESSION_KEY).await? else {
            return Ok(None);
        };

        match serde_json::from_str::<Session>(&raw) {
            Ok(session) => Ok(Some(session)),
            Err(e) => {
                // Unreadable entry: drop it so the user is asked to log in again
                warn!("Discarding unreadable persisted session: {}", e);
                settings::delete_setting(&self.db, SESSION_KEY).await?;
                Ok(None)
            }
        }
    }

    async fn save(&self, session: &Session) -> Result<()> {
        let raw = serde_json::to_string(session)
            .map_err(|e| Error::Internal(format!("Failed to serialize session: {}", e)))?;
        settings::set_setting(&self.db, SESSION_KEY, &raw).await
    }

    async fn clear(&self) -> Result<()> {
        settings::delete_setting(&self.db, SESSION_KEY).await
    }
}

/// In-process session store (nothing survives the process)
#[derive(Default)]
pub struct MemorySessionStore {
    session: Mutex<Option<Session>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with a session
    pub fn with_session(session: Session) -> Self {
        Self {
            session: Mutex::new(Some(session)),
        }
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self) -> Result<Option<Session>> {
        let guard = self
            .session
            .lock()
            .map_err(|_| Error::Internal("session store lock poisoned".to_string()))?;
        Ok(guard.clone())
    }

    async fn save(&self, session: &Session) -> Result<()> {
        let mut guard = self
            .session
            .lock()
            .map_err(|_| Error::Internal("session store lock poisoned".to_string()))?;
        *guard = Some(session.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let mut guard = self
            .session
            .lock()
            .map_err(|_| Error::Internal("session store lock poisoned".to_string()))?;
        *guard = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_test_db() -> SqlitePool {
        let pool = SqlitePool::connect(":memory:").await.unwrap();
        fdash_common::db::init::create_settings_table(&pool)
            .await
            .unwrap();
        pool
    }

    fn test_session() -> Session {
        Session {
            access_token: "access-1".to_string(),
            refresh_token: "refresh-1".to_string(),
            tenant_id: "tenant-a".to_string(),
            profile: None,
        }
    }

    #[tokio::test]
    async fn test_sqlite_store_roundtrip() {
        let store = SqliteSessionStore::new(setup_test_db().await);

        assert!(store.load().await.unwrap().is_none());

        store.save(&test_session()).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(test_session()));

        store.clear().await.unwrap();
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sqlite_store_discards_corrupt_entry() {
        let pool = setup_test_db().await;
        settings::set_setting(&pool, SESSION_KEY, "{not json")
            .await
            .unwrap();
        let store = SqliteSessionStore::new(pool.clone());

        assert!(store.load().await.unwrap().is_none());
        assert_eq!(settings::get_setting(&pool, SESSION_KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemorySessionStore::with_session(test_session());
        assert_eq!(store.load().await.unwrap(), Some(test_session()));

        store.clear().await.unwrap();
        store.clear().await.unwrap();
        assert!(store.load().await.unwrap().is_none());
    }
}
