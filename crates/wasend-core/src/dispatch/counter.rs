//! Daily successful-send counter

use chrono::NaiveDate;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};
use wasend_storage::CounterStore;

/// Successful sends for one calendar day, persisted through a [`CounterStore`]
pub struct DailyCounter {
    store: Arc<dyn CounterStore>,
    current: Mutex<Option<(NaiveDate, u32)>>,
}

impl DailyCounter {
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self {
            store,
            current: Mutex::new(None),
        }
    }

    /// Last known count, without touching the store
    pub fn cached(&self, today: NaiveDate) -> u32 {
        let cached = *self.lock();
        match cached {
            Some((date, count)) if date == today => count,
            _ => 0,
        }
    }

    /// Count for `today`, loading from the store on first use or day rollover
    pub async fn current(&self, today: NaiveDate) -> u32 {
        let cached = *self.lock();
        match cached {
            Some((date, count)) if date == today => count,
            _ => self.reload(today).await,
        }
    }

    /// Re-read the count for `today` from the store
    pub async fn reload(&self, today: NaiveDate) -> u32 {
        let count = match self.store.load(today).await {
            Ok(count) => count,
            Err(e) => {
                warn!(%today, "Failed to load daily counter, starting from zero: {}", e);
                0
            }
        };

        let mut current = self.lock();
        // An increment may have landed while the store was being read
        let count = match *current {
            Some((date, cached)) if date == today => cached.max(count),
            _ => count,
        };
        *current = Some((today, count));
        debug!(%today, count, "Daily counter loaded");
        count
    }

    /// Record one successful send and persist the new count
    pub async fn increment(&self, today: NaiveDate) -> u32 {
        let known = self.current(today).await;

        let count = {
            let mut current = self.lock();
            let count = match *current {
                Some((date, cached)) if date == today => cached + 1,
                _ => known + 1,
            };
            *current = Some((today, count));
            count
        };

        if let Err(e) = self.store.save(today, count).await {
            warn!(%today, count, "Failed to persist daily counter: {}", e);
        }
        count
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<(NaiveDate, u32)>> {
        self.current.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use wasend_common::{Error, Result};
    use wasend_storage::MemoryCounterStore;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, d).unwrap()
    }

    #[tokio::test]
    async fn test_increment_persists() {
        let store = Arc::new(MemoryCounterStore::new());
        let counter = DailyCounter::new(store.clone());

        assert_eq!(counter.current(day(1)).await, 0);
        assert_eq!(counter.increment(day(1)).await, 1);
        assert_eq!(counter.increment(day(1)).await, 2);
        assert_eq!(store.load(day(1)).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_resumes_from_store() {
        let store = Arc::new(MemoryCounterStore::with_count(day(1), 40));
        let counter = DailyCounter::new(store);

        assert_eq!(counter.cached(day(1)), 0);
        assert_eq!(counter.current(day(1)).await, 40);
        assert_eq!(counter.increment(day(1)).await, 41);
        assert_eq!(counter.cached(day(1)), 41);
    }

    #[tokio::test]
    async fn test_rolls_over_at_midnight() {
        let store = Arc::new(MemoryCounterStore::new());
        let counter = DailyCounter::new(store.clone());

        counter.increment(day(1)).await;
        counter.increment(day(1)).await;
        assert_eq!(counter.current(day(2)).await, 0);
        assert_eq!(counter.increment(day(2)).await, 1);
        assert_eq!(store.load(day(1)).await.unwrap(), 2);
    }

    struct BrokenStore;

    #[async_trait]
    impl CounterStore for BrokenStore {
        async fn load(&self, _date: NaiveDate) -> Result<u32> {
            Err(Error::Storage("disk on fire".into()))
        }

        async fn save(&self, _date: NaiveDate, _count: u32) -> Result<()> {
            Err(Error::Storage("disk on fire".into()))
        }
    }

    #[tokio::test]
    async fn test_store_errors_keep_counting_in_memory() {
        let counter = DailyCounter::new(Arc::new(BrokenStore));
        assert_eq!(counter.current(day(1)).await, 0);
        assert_eq!(counter.increment(day(1)).await, 1);
        assert_eq!(counter.increment(day(1)).await, 2);
    }
}
