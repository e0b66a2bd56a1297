//! Status-change subscribers
//!
//! One active subscriber per event kind; registering again replaces the
//! previous callback. Callers needing several listeners fan out themselves.

use std::sync::{Arc, RwLock};
use wasend_common::types::{PipelineStats, WorkItem};

pub type StatsCallback = Arc<dyn Fn(&PipelineStats) + Send + Sync>;
pub type QueueCallback = Arc<dyn Fn(&[WorkItem]) + Send + Sync>;

#[derive(Default)]
pub(crate) struct Observers {
    stats: RwLock<Option<StatsCallback>>,
    queue: RwLock<Option<QueueCallback>>,
}

impl Observers {
    pub fn set_stats(&self, callback: StatsCallback) {
        *self.stats.write().unwrap_or_else(|e| e.into_inner()) = Some(callback);
    }

    pub fn set_queue(&self, callback: QueueCallback) {
        *self.queue.write().unwrap_or_else(|e| e.into_inner()) = Some(callback);
    }

    pub fn has_queue(&self) -> bool {
        self.queue
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    pub fn notify_stats(&self, stats: &PipelineStats) {
        // Clone out so the callback runs without the lock held
        let callback = self.stats.read().unwrap_or_else(|e| e.into_inner()).clone();
        if let Some(callback) = callback {
            callback(stats);
        }
    }

    pub fn notify_queue(&self, queue: &[WorkItem]) {
        let callback = self.queue.read().unwrap_or_else(|e| e.into_inner()).clone();
        if let Some(callback) = callback {
            callback(queue);
        }
    }
}
