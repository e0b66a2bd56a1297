//! Dispatch - Queueing, scheduling and delivery of outbound messages

mod counter;
mod export;
mod observer;
mod pipeline;
mod policy;
mod stats;
mod template;


pub use counter::DailyCounter;
pub use export::{DispatchLog, LogEntry};
pub use observer::{QueueCallback, StatsCallback};
pub use pipeline::DispatchPipeline;
pub use policy::{SchedulePolicy, TimeWindow};
pub use stats::{compute_stats, estimate_completion, StatsContext};
pub use template::TemplateRenderer;
