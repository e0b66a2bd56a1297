//! SQLite connection pool and counter store

use crate::counter::CounterStore;
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::time::Duration;
use tracing::info;
use wasend_common::config::StorageConfig;
use wasend_common::{Error, Result};

/// Database pool wrapper
#[derive(Clone)]
pub struct DatabasePool {
    pool: SqlitePool,
}

impl DatabasePool {
    /// Open the database file named in the configuration
    pub async fn new(config: &StorageConfig) -> Result<Self> {
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| Error::Storage(format!("Failed to create directory: {}", e)))?;
            }
        }

        info!(path = %config.path.display(), "Opening counter database");

        let options = SqliteConnectOptions::new()
            .filename(&config.path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await
            .map_err(|e| Error::Database(format!("Failed to connect: {}", e)))?;

        Ok(Self { pool })
    }

    /// Open a private in-memory database
    pub async fn in_memory() -> Result<Self> {
        // Every connection to :memory: is a separate database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| Error::Database(format!("Failed to connect: {}", e)))?;

        Ok(Self { pool })
    }

    /// Get the underlying pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Run database migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(format!("Migration failed: {}", e)))?;

        info!("Database migrations completed");
        Ok(())
    }

    /// Check database health
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Database(format!("Health check failed: {}", e)))?;
        Ok(())
    }
}

/// Counter store backed by the `daily_counters` table
#[derive(Clone)]
pub struct SqliteCounterStore {
    db_pool: DatabasePool,
}

impl SqliteCounterStore {
    pub fn new(db_pool: DatabasePool) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl CounterStore for SqliteCounterStore {
    async fn load(&self, date: NaiveDate) -> Result<u32> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT count FROM daily_counters WHERE day = ?1")
                .bind(date.to_string())
                .fetch_optional(self.db_pool.pool())
                .await
                .map_err(|e| Error::Database(format!("Failed to load counter: {}", e)))?;

        Ok(row.map(|(c,)| c.max(0) as u32).unwrap_or(0))
    }

    async fn save(&self, date: NaiveDate, count: u32) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO daily_counters (day, count, updated_at)
            VALUES (?1, ?2, CURRENT_TIMESTAMP)
            ON CONFLICT (day)
            DO UPDATE SET count = excluded.count, updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(date.to_string())
        .bind(count as i64)
        .execute(self.db_pool.pool())
        .await
        .map_err(|e| Error::Database(format!("Failed to save counter: {}", e)))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    #[tokio::test]
    async fn test_sqlite_store_in_memory() {
        let pool = DatabasePool::in_memory().await.unwrap();
        pool.migrate().await.unwrap();

        let store = SqliteCounterStore::new(pool);
        assert_eq!(store.load(day(3)).await.unwrap(), 0);

        store.save(day(3), 4).await.unwrap();
        store.save(day(3), 5).await.unwrap();
        assert_eq!(store.load(day(3)).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_sqlite_store_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let config = StorageConfig {
            backend: "sqlite".to_string(),
            path: temp_dir.path().join("counters.db"),
        };

        {
            let pool = DatabasePool::new(&config).await.unwrap();
            pool.migrate().await.unwrap();
            SqliteCounterStore::new(pool).save(day(8), 21).await.unwrap();
        }

        let pool = DatabasePool::new(&config).await.unwrap();
        pool.migrate().await.unwrap();
        let store = SqliteCounterStore::new(pool);
        assert_eq!(store.load(day(8)).await.unwrap(), 21);
    }
}
