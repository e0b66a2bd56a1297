//! wasend Common - Shared types and utilities
//!
//! This crate provides the work item model, configuration, and error
//! types shared across all wasend components.

pub mod config;
pub mod error;
pub mod types;

pub use config::{Config, PipelineConfig, PipelineConfigPatch};
pub use error::{Error, Result};
