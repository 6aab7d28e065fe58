//! Keyed record store for notifications, delegations and comments
//!
//! Each collection is kept as one JSON-serialized record sequence under a fixed key.
//! Writes replace the whole sequence; there are no cross-collection transactions.

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by the storage substrate
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Corrupt record payload under {key}: {source}")]
    Serialization {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Storage quota exceeded writing {key}: {requested} bytes requested, quota is {quota}")]
    QuotaExceeded {
        key: String,
        requested: usize,
        quota: usize,
    },

    #[error("Record {id} not found in {key}")]
    RecordNotFound { key: String, id: Uuid },
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// The fixed collections the store knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Notifications,
    Delegations,
    Comments,
}

impl Collection {
    /// Storage key for this collection
    pub fn key(&self) -> &'static str {
        match self {
            Collection::Notifications => "collaboration_notifications",
            Collection::Delegations => "task_delegations",
            Collection::Comments => "task_comments",
        }
    }
}

/// A record that lives in one of the store's collections
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const COLLECTION: Collection;

    fn record_id(&self) -> Uuid;
}

#[derive(Default)]
struct MemoryState {
    entries: HashMap<String, String>,
    quota: Option<usize>,
}

impl MemoryState {
    fn used_bytes_excluding(&self, key: &str) -> usize {
        self.entries
            .iter()
            .filter(|(k, _)| k.as_str() != key)
            .map(|(k, v)| k.len() + v.len())
            .sum()
    }
}

#[derive(Clone)]
enum Backend {
    Memory(Arc<Mutex<MemoryState>>),
    Sqlite(SqlitePool),
}

/// Record store
#[derive(Clone)]
pub struct Store {
    backend: Backend,
}

impl Store {
    /// Process-local store with no quota
    pub fn in_memory() -> Self {
        Self {
            backend: Backend::Memory(Arc::new(Mutex::new(MemoryState::default()))),
        }
    }

    /// Process-local store that rejects writes once `quota_bytes` would be exceeded
    pub fn in_memory_with_quota(quota_bytes: usize) -> Self {
        let store = Self::in_memory();
        store.set_memory_quota(Some(quota_bytes));
        store
    }

    /// SQLite-backed store on an existing pool. Call [`Store::migrate`] before use.
    pub fn sqlite(pool: SqlitePool) -> Self {
        Self {
            backend: Backend::Sqlite(pool),
        }
    }

    /// Open a SQLite database and apply the embedded migrations
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        // Every connection to an in-memory database gets its own database
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        let store = Self::sqlite(pool);
        store.migrate().await?;
        tracing::info!("Record store connected to {}", database_url);
        Ok(store)
    }

    /// Apply embedded migrations (no-op for the memory backend)
    pub async fn migrate(&self) -> StoreResult<()> {
        if let Backend::Sqlite(pool) = &self.backend {
            sqlx::migrate!("./migrations").run(pool).await?;
        }
        Ok(())
    }

    /// Change the byte quota of a memory store; ignored for SQLite
    pub fn set_memory_quota(&self, quota: Option<usize>) {
        if let Backend::Memory(state) = &self.backend {
            let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
            state.quota = quota;
        }
    }

    async fn read_raw(&self, key: &str) -> StoreResult<Option<String>> {
        match &self.backend {
            Backend::Memory(state) => {
                let state = state.lock().unwrap_or_else(|e| e.into_inner());
                Ok(state.entries.get(key).cloned())
            }
            Backend::Sqlite(pool) => {
                let row = sqlx::query_as::<_, (String,)>(
                    r#"
                    SELECT value FROM collab_records WHERE key = ?
                    "#,
                )
                .bind(key)
                .fetch_optional(pool)
                .await?;
                Ok(row.map(|(value,)| value))
            }
        }
    }

    async fn write_raw(&self, key: &str, value: String) -> StoreResult<()> {
        match &self.backend {
            Backend::Memory(state) => {
                let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
                if let Some(quota) = state.quota {
                    let requested = state.used_bytes_excluding(key) + key.len() + value.len();
                    if requested > quota {
                        return Err(StoreError::QuotaExceeded {
                            key: key.to_string(),
                            requested,
                            quota,
                        });
                    }
                }
                state.entries.insert(key.to_string(), value);
                Ok(())
            }
            Backend::Sqlite(pool) => {
                sqlx::query(
                    r#"
                    INSERT INTO collab_records (key, value, updated_at)
                    VALUES (?, ?, ?)
                    ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
                    "#,
                )
                .bind(key)
                .bind(value)
                .bind(Utc::now())
                .execute(pool)
                .await?;
                Ok(())
            }
        }
    }

    /// Load every record of a collection, in stored order
    pub async fn get<T: Record>(&self) -> StoreResult<Vec<T>> {
        let key = T::COLLECTION.key();
        match self.read_raw(key).await? {
            Some(raw) => serde_json::from_str(&raw).map_err(|source| StoreError::Serialization {
                key: key.to_string(),
                source,
            }),
            None => Ok(Vec::new()),
        }
    }

    /// Replace a collection's records
    pub async fn set<T: Record>(&self, records: &[T]) -> StoreResult<()> {
        let key = T::COLLECTION.key();
        let raw = serde_json::to_string(records).map_err(|source| StoreError::Serialization {
            key: key.to_string(),
            source,
        })?;
        self.write_raw(key, raw).await?;
        tracing::debug!("Wrote {} records to {}", records.len(), key);
        Ok(())
    }

    /// Add a record at the end of its collection. Callers serialize writers per collection.
    pub async fn append<T: Record>(&self, record: T) -> StoreResult<T> {
        let mut records = self.get::<T>().await?;
        records.push(record.clone());
        self.set(&records).await?;
        Ok(record)
    }

    /// Apply `patch` to the record with `id` and write the collection back
    pub async fn update<T, F>(&self, id: Uuid, patch: F) -> StoreResult<T>
    where
        T: Record,
        F: FnOnce(&mut T),
    {
        let mut records = self.get::<T>().await?;
        let record = records
            .iter_mut()
            .find(|r| r.record_id() == id)
            .ok_or_else(|| StoreError::RecordNotFound {
                key: T::COLLECTION.key().to_string(),
                id,
            })?;
        patch(record);
        let updated = record.clone();
        self.set(&records).await?;
        Ok(updated)
    }
}
