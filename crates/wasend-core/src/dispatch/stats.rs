//! Aggregate statistics and completion estimate

use super::policy::SchedulePolicy;
use chrono::{DateTime, Duration, Utc};
use wasend_common::types::{ItemStatus, PipelineStats, RunState, WorkItem};

/// Inputs to [`compute_stats`] that live outside the queue
#[derive(Debug, Clone, Copy)]
pub struct StatsContext {
    pub daily_count: u32,
    pub batch_processed: u32,
    /// End of the batch pause in progress, if any
    pub batch_pause_until: Option<DateTime<Utc>>,
    pub run_state: RunState,
    pub now: DateTime<Utc>,
}

/// Derive pipeline statistics from the queue and counters
pub fn compute_stats(queue: &[WorkItem], policy: &SchedulePolicy, ctx: StatsContext) -> PipelineStats {
    let mut stats = PipelineStats {
        total: queue.len(),
        daily_count: ctx.daily_count,
        daily_limit: policy.daily_limit,
        batch_processed: ctx.batch_processed,
        run_state: ctx.run_state,
        ..Default::default()
    };

    for item in queue {
        match item.status {
            ItemStatus::Pending => stats.pending += 1,
            ItemStatus::Processing => stats.processing += 1,
            ItemStatus::Sent => stats.sent += 1,
            ItemStatus::Delivered => stats.delivered += 1,
            ItemStatus::Failed => stats.failed += 1,
            ItemStatus::Blocked => stats.blocked += 1,
        }
    }

    let remaining = queue
        .iter()
        .filter(|item| item.is_eligible(policy.max_attempts))
        .count();
    stats.estimated_completion = estimate_completion(remaining, policy, &ctx);

    stats
}

/// When the `remaining` eligible items should be out, `None` when nothing is left
///
/// Sending time at the configured rate, plus the rest of a batch pause in
/// progress, plus one pause per batch boundary still ahead. The current
/// batch only has `batch_size - batch_processed` slots left.
pub fn estimate_completion(
    remaining: usize,
    policy: &SchedulePolicy,
    ctx: &StatsContext,
) -> Option<DateTime<Utc>> {
    if remaining == 0 {
        return None;
    }

    let batch_size = policy.batch_size as usize;
    let (start, slots_left) = match ctx.batch_pause_until {
        Some(until) => (until.max(ctx.now), batch_size),
        _ => (
            ctx.now,
            batch_size.saturating_sub(ctx.batch_processed as usize),
        ),
    };

    let overflow = remaining.saturating_sub(slots_left);
    let pauses = overflow.div_ceil(batch_size) as i32;
    let sending_ms = remaining as f64 * 60_000.0 / policy.messages_per_minute as f64;

    Some(start + Duration::milliseconds(sending_ms.round() as i64) + policy.batch_pause * pauses)
}
