//! Daily counter storage abstraction

use crate::db::{DatabasePool, SqliteCounterStore};
use crate::file::FileCounterStore;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use wasend_common::config::StorageConfig;
use wasend_common::{Error, Result};

/// Persistence for the successful-send counter, keyed by calendar date
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Load the count stored for a day, zero if nothing was stored
    async fn load(&self, date: NaiveDate) -> Result<u32>;

    /// Store the count for a day
    async fn save(&self, date: NaiveDate, count: u32) -> Result<()>;
}

/// In-memory counter store
#[derive(Default)]
pub struct MemoryCounterStore {
    counts: RwLock<HashMap<NaiveDate, u32>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store with a count already recorded for a day
    pub fn with_count(date: NaiveDate, count: u32) -> Self {
        let mut counts = HashMap::new();
        counts.insert(date, count);
        Self {
            counts: RwLock::new(counts),
        }
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn load(&self, date: NaiveDate) -> Result<u32> {
        Ok(self.counts.read().await.get(&date).copied().unwrap_or(0))
    }

    async fn save(&self, date: NaiveDate, count: u32) -> Result<()> {
        self.counts.write().await.insert(date, count);
        Ok(())
    }
}

/// Create a counter store from configuration
pub async fn create_counter_store(config: &StorageConfig) -> Result<Arc<dyn CounterStore>> {
    match config.backend.as_str() {
        "memory" => Ok(Arc::new(MemoryCounterStore::new())),
        "file" => Ok(Arc::new(FileCounterStore::new(config.path.clone()))),
        "sqlite" => {
            let pool = DatabasePool::new(config).await?;
            pool.migrate().await?;
            pool.health_check().await?;
            Ok(Arc::new(SqliteCounterStore::new(pool)))
        }
        other => Err(Error::Config(format!(
            "Unsupported storage backend: {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryCounterStore::new();
        assert_eq!(store.load(day(1)).await.unwrap(), 0);

        store.save(day(1), 7).await.unwrap();
        assert_eq!(store.load(day(1)).await.unwrap(), 7);
        assert_eq!(store.load(day(2)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_seeded_memory_store() {
        let store = MemoryCounterStore::with_count(day(5), 100);
        assert_eq!(store.load(day(5)).await.unwrap(), 100);
    }

    #[tokio::test]
    async fn test_create_store_from_config() {
        let config = StorageConfig {
            backend: "memory".to_string(),
            ..Default::default()
        };
        let store = create_counter_store(&config).await.unwrap();
        store.save(day(1), 3).await.unwrap();
        assert_eq!(store.load(day(1)).await.unwrap(), 3);

        let config = StorageConfig {
            backend: "redis".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            create_counter_store(&config).await,
            Err(Error::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_create_sqlite_store_from_config() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let config = StorageConfig {
            backend: "sqlite".to_string(),
            path: temp_dir.path().join("counters.db"),
        };

        let store = create_counter_store(&config).await.unwrap();
        store.save(day(2), 9).await.unwrap();
        assert_eq!(store.load(day(2)).await.unwrap(), 9);
    }
}
