//! Wall clock abstraction
//!
//! The dispatch loop reads local wall time for scheduling, business hours
//! and the daily counter's calendar date. Waiting itself always goes
//! through tokio's timer, so a clock must agree with it.

use chrono::{DateTime, FixedOffset, Local};

/// Source of local wall time
pub trait Clock: Send + Sync {
    /// Current local time, with its UTC offset
    fn now(&self) -> DateTime<FixedOffset>;
}

/// Host clock in the host's local time zone
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<FixedOffset> {
        Local::now().fixed_offset()
    }
}

/// Wall time derived from tokio's timer
///
/// Reads `anchor` plus the time elapsed on `tokio::time::Instant` since
/// creation. Under a paused runtime (`start_paused = true`) this clock
/// jumps forward together with auto-advanced timers.
#[derive(Debug, Clone)]
pub struct TokioClock {
    anchor: DateTime<FixedOffset>,
    start: tokio::time::Instant,
}

impl TokioClock {
    pub fn new(anchor: DateTime<FixedOffset>) -> Self {
        Self {
            anchor,
            start: tokio::time::Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<FixedOffset> {
        let elapsed = self.start.elapsed();
        match chrono::Duration::from_std(elapsed) {
            Ok(elapsed) => self.anchor + elapsed,
            Err(_) => self.anchor,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_tokio_clock_follows_timer() {
        let anchor = FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2024, 3, 4, 8, 0, 0)
            .unwrap();
        let clock = TokioClock::new(anchor);
        assert_eq!(clock.now(), anchor);

        tokio::time::sleep(Duration::from_secs(90 * 60)).await;
        let drift = clock.now() - (anchor + chrono::Duration::minutes(90));
        assert!(drift.num_milliseconds().abs() < 5);
    }

    #[test]
    fn test_system_clock_is_close_to_utc_now() {
        let delta = SystemClock.now().timestamp() - chrono::Utc::now().timestamp();
        assert!(delta.abs() <= 1);
    }
}
