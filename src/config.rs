use std::time::Duration;

use crate::notification::NotificationSettings;
use crate::store::Store;

/// Runtime configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollabConfig {
    /// SQLite connection string; the in-memory store is used when absent
    pub database_url: Option<String>,

    /// Days a read notification is kept before `clear_old_notifications` removes it (default: 30)
    pub retention_days: i64,

    /// Capacity of the arrival broadcast channel (default: 256)
    pub arrival_channel_capacity: usize,

    /// Interval between simulated notifications in milliseconds (default: 5000)
    pub simulation_interval_ms: u64,

    /// Interval between simulated connection flaps in milliseconds (default: 10000)
    pub connection_flap_interval_ms: u64,

    /// Byte quota of the in-memory store; unlimited when absent
    pub memory_quota_bytes: Option<usize>,
}

impl Default for CollabConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            retention_days: 30,
            arrival_channel_capacity: 256,
            simulation_interval_ms: 5000,
            connection_flap_interval_ms: 10_000,
            memory_quota_bytes: None,
        }
    }
}

impl CollabConfig {
    /// Load configuration from environment variables, reading `.env` first if present.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let config = Self {
            database_url: var("COLLAB_DATABASE_URL"),
            retention_days: var("COLLAB_RETENTION_DAYS")
                .map(|v| v.trim().parse::<i64>())
                .transpose()
                .map_err(|_| anyhow::anyhow!("COLLAB_RETENTION_DAYS must be a valid i64"))?
                .unwrap_or(defaults.retention_days),
            arrival_channel_capacity: var("COLLAB_ARRIVAL_CHANNEL_CAPACITY")
                .map(|v| v.trim().parse::<usize>())
                .transpose()
                .map_err(|_| {
                    anyhow::anyhow!("COLLAB_ARRIVAL_CHANNEL_CAPACITY must be a valid usize")
                })?
                .unwrap_or(defaults.arrival_channel_capacity),
            simulation_interval_ms: var("COLLAB_SIMULATION_INTERVAL_MS")
                .map(|v| v.trim().parse::<u64>())
                .transpose()
                .map_err(|_| anyhow::anyhow!("COLLAB_SIMULATION_INTERVAL_MS must be a valid u64"))?
                .unwrap_or(defaults.simulation_interval_ms),
            connection_flap_interval_ms: var("COLLAB_CONNECTION_FLAP_INTERVAL_MS")
                .map(|v| v.trim().parse::<u64>())
                .transpose()
                .map_err(|_| {
                    anyhow::anyhow!("COLLAB_CONNECTION_FLAP_INTERVAL_MS must be a valid u64")
                })?
                .unwrap_or(defaults.connection_flap_interval_ms),
            memory_quota_bytes: var("COLLAB_MEMORY_QUOTA_BYTES")
                .map(|v| v.trim().parse::<usize>())
                .transpose()
                .map_err(|_| anyhow::anyhow!("COLLAB_MEMORY_QUOTA_BYTES must be a valid usize"))?,
        };

        // Timer periods must be non-zero
        if config.simulation_interval_ms == 0 {
            anyhow::bail!("COLLAB_SIMULATION_INTERVAL_MS must be greater than 0");
        }
        if config.connection_flap_interval_ms == 0 {
            anyhow::bail!("COLLAB_CONNECTION_FLAP_INTERVAL_MS must be greater than 0");
        }
        Ok(config)
    }

    pub fn notification_settings(&self) -> NotificationSettings {
        NotificationSettings {
            retention_days: self.retention_days,
            arrival_channel_capacity: self.arrival_channel_capacity,
        }
    }

    pub fn simulation_interval(&self) -> Duration {
        Duration::from_millis(self.simulation_interval_ms)
    }

    pub fn connection_flap_interval(&self) -> Duration {
        Duration::from_millis(self.connection_flap_interval_ms)
    }

    /// Open the configured store: SQLite when a database URL is set, memory otherwise
    pub async fn open_store(&self) -> anyhow::Result<Store> {
        match &self.database_url {
            Some(url) => Ok(Store::connect(url).await?),
            None => {
                let store = Store::in_memory();
                store.set_memory_quota(self.memory_quota_bytes);
                Ok(store)
            }
        }
    }
}
