//! wasend Storage - Daily counter persistence
//!
//! This crate persists the rolling daily successful-send counter,
//! keyed by calendar date, in memory, a JSON file, or SQLite.

pub mod counter;
pub mod db;
pub mod file;

pub use counter::{create_counter_store, CounterStore, MemoryCounterStore};
pub use db::{DatabasePool, SqliteCounterStore};
pub use file::FileCounterStore;
