//! JSON file counter store

use crate::counter::CounterStore;
use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;
use wasend_common::{Error, Result};

/// Days of history kept in the counter file
const RETENTION_DAYS: i64 = 7;

/// Counter store backed by a single JSON object keyed by ISO date
pub struct FileCounterStore {
    path: PathBuf,
    /// Serializes read-modify-write cycles
    lock: Mutex<()>,
}

impl FileCounterStore {
    /// Create a store writing to `path`; the file is created on first save
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Path of the counter file
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<BTreeMap<String, u32>> {
        let data = match fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => {
                return Err(Error::Storage(format!(
                    "Failed to read counter file: {}",
                    e
                )))
            }
        };

        if data.is_empty() {
            return Ok(BTreeMap::new());
        }

        serde_json::from_slice(&data)
            .map_err(|e| Error::Storage(format!("Corrupt counter file: {}", e)))
    }

    async fn write_all(&self, counts: &BTreeMap<String, u32>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|e| Error::Storage(format!("Failed to create directory: {}", e)))?;
            }
        }

        let data = serde_json::to_vec_pretty(counts)?;
        let tmp = self.path.with_extension("tmp");

        fs::write(&tmp, &data)
            .await
            .map_err(|e| Error::Storage(format!("Failed to write counter file: {}", e)))?;
        fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| Error::Storage(format!("Failed to replace counter file: {}", e)))?;

        Ok(())
    }
}

#[async_trait]
impl CounterStore for FileCounterStore {
    async fn load(&self, date: NaiveDate) -> Result<u32> {
        let _guard = self.lock.lock().await;
        let counts = self.read_all().await?;
        Ok(counts.get(&date.to_string()).copied().unwrap_or(0))
    }

    async fn save(&self, date: NaiveDate, count: u32) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut counts = self.read_all().await?;

        counts.insert(date.to_string(), count);

        let cutoff = date - Duration::days(RETENTION_DAYS);
        counts.retain(|key, _| {
            key.parse::<NaiveDate>()
                .map(|d| d >= cutoff)
                .unwrap_or(false)
        });

        self.write_all(&counts).await?;
        debug!(path = %self.path.display(), %date, count, "Saved daily counter");
        Ok(())
    }
}
