//! Typed key/value state (circuit breaker, EMA stats).
//!
//! Records are stored as JSON in `app_state`. Keys are built only here.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::SqlitePool;

use crate::Result;
use crate::database::models::{BreakerRecord, EmaKind, EmaRecord};
use crate::database::retry::retry_on_sqlite_busy;
use crate::database::time::now_ms;

/// Persistent per-channel state used by the engine.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get_breaker_state(&self, channel: &str) -> Result<Option<BreakerRecord>>;
    async fn put_breaker_state(&self, channel: &str, record: &BreakerRecord) -> Result<()>;
    async fn get_ema(&self, channel: &str, kind: EmaKind) -> Result<Option<EmaRecord>>;
    async fn put_ema(&self, channel: &str, kind: EmaKind, record: &EmaRecord) -> Result<()>;
}

fn breaker_key(channel: &str) -> String {
    format!("breaker:{}", channel)
}

fn ema_key(channel: &str, kind: EmaKind) -> String {
    format!("ema:{}:{}", channel, kind.as_str())
}

/// SQLx implementation of StateStore.
#[derive(Clone)]
pub struct SqlxStateStore {
    pool: SqlitePool,
}

impl SqlxStateStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM app_state WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        match value {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn put_json<T: Serialize + Sync>(&self, key: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string(value)?;
        let json = json.as_str();
        retry_on_sqlite_busy("put_app_state", || async move {
            sqlx::query(
                r#"
                INSERT INTO app_state (key, value, updated_at) VALUES (?, ?, ?)
                ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
                "#,
            )
            .bind(key)
            .bind(json)
            .bind(now_ms())
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl StateStore for SqlxStateStore {
    async fn get_breaker_state(&self, channel: &str) -> Result<Option<BreakerRecord>> {
        self.get_json(&breaker_key(channel)).await
    }

    async fn put_breaker_state(&self, channel: &str, record: &BreakerRecord) -> Result<()> {
        self.put_json(&breaker_key(channel), record).await
    }

    async fn get_ema(&self, channel: &str, kind: EmaKind) -> Result<Option<EmaRecord>> {
        self.get_json(&ema_key(channel, kind)).await
    }

    async fn put_ema(&self, channel: &str, kind: EmaKind, record: &EmaRecord) -> Result<()> {
        self.put_json(&ema_key(channel, kind), record).await
    }
}

/// In-memory StateStore for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryStateStore {
    breakers: Mutex<HashMap<String, BreakerRecord>>,
    emas: Mutex<HashMap<String, EmaRecord>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get_breaker_state(&self, channel: &str) -> Result<Option<BreakerRecord>> {
        Ok(self.breakers.lock().get(&breaker_key(channel)).copied())
    }

    async fn put_breaker_state(&self, channel: &str, record: &BreakerRecord) -> Result<()> {
        self.breakers.lock().insert(breaker_key(channel), *record);
        Ok(())
    }

    async fn get_ema(&self, channel: &str, kind: EmaKind) -> Result<Option<EmaRecord>> {
        Ok(self.emas.lock().get(&ema_key(channel, kind)).copied())
    }

    async fn put_ema(&self, channel: &str, kind: EmaKind, record: &EmaRecord) -> Result<()> {
        self.emas.lock().insert(ema_key(channel, kind), *record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::CircuitState;
    use crate::database::{init_pool, run_migrations};

    #[tokio::test]
    async fn test_sqlx_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("t.db").display());
        let pool = init_pool(&url).await.unwrap();
        run_migrations(&pool).await.unwrap();
        let store = SqlxStateStore::new(pool.clone());

        assert!(store.get_breaker_state("chan").await.unwrap().is_none());

        let record = BreakerRecord {
            state: CircuitState::Open,
            consecutive_failures: 5,
            open_until_ms: Some(42),
        };
        store.put_breaker_state("chan", &record).await.unwrap();
        store.put_breaker_state("chan", &record).await.unwrap();
        assert_eq!(store.get_breaker_state("chan").await.unwrap(), Some(record));
        assert!(store.get_breaker_state("other").await.unwrap().is_none());

        let ema = EmaRecord {
            value_secs: 12.5,
            samples: 3,
        };
        store.put_ema("chan", EmaKind::Fetch, &ema).await.unwrap();
        assert_eq!(store.get_ema("chan", EmaKind::Fetch).await.unwrap(), Some(ema));
        assert!(store.get_ema("chan", EmaKind::Publish).await.unwrap().is_none());

        let keys: Vec<String> = sqlx::query_scalar("SELECT key FROM app_state ORDER BY key")
            .fetch_all(&pool)
            .await
            .unwrap();
        assert_eq!(keys, vec!["breaker:chan", "ema:chan:fetch"]);
    }

    #[tokio::test]
    async fn test_corrupt_record_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("t.db").display());
        let pool = init_pool(&url).await.unwrap();
        run_migrations(&pool).await.unwrap();

        sqlx::query("INSERT INTO app_state (key, value, updated_at) VALUES ('breaker:chan', 'not json', 0)")
            .execute(&pool)
            .await
            .unwrap();

        let store = SqlxStateStore::new(pool);
        assert!(store.get_breaker_state("chan").await.is_err());
    }
}
