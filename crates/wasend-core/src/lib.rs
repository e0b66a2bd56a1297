//! wasend Core - Outbound message dispatch
//!
//! This crate provides the dispatch pipeline that schedules WhatsApp
//! messages under rate, batch, daily-cap and business-hours constraints,
//! retries transient failures, and reports per-item status to observers.

pub mod clock;
pub mod dispatch;
pub mod gateway;

pub use clock::{Clock, SystemClock, TokioClock};
pub use dispatch::{
    DispatchLog, DispatchPipeline, LogEntry, SchedulePolicy, TemplateRenderer,
};
pub use gateway::{
    create_gateway, DeliveryError, FailureKind, Gateway, HttpGateway, SimulatedGateway,
};
