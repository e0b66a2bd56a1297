//! Scheduling policy compiled from the pipeline configuration

use chrono::{DateTime, Duration, FixedOffset, NaiveTime, TimeZone, Utc};
use wasend_common::config::{parse_clock_time, PipelineConfig};
use wasend_common::types::Priority;
use wasend_common::Result;

/// A daily window of local time; `start > end` wraps past midnight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    start: NaiveTime,
    end: NaiveTime,
}

impl TimeWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    pub fn parse(start: &str, end: &str) -> Result<Self> {
        Ok(Self::new(parse_clock_time(start)?, parse_clock_time(end)?))
    }

    /// Whether a local time of day falls inside the window
    pub fn contains(&self, t: NaiveTime) -> bool {
        if self.start < self.end {
            t >= self.start && t < self.end
        } else {
            t >= self.start || t < self.end
        }
    }

    /// Next instant at or after `now` that lies inside the window
    pub fn next_open(&self, now: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
        if self.contains(now.time()) {
            return now;
        }

        let opening = now.date_naive().and_time(self.start);
        let candidate = now
            .offset()
            .from_local_datetime(&opening)
            .single()
            .unwrap_or(now);

        if candidate <= now {
            candidate + Duration::days(1)
        } else {
            candidate
        }
    }
}

/// Validated, parsed form of [`PipelineConfig`] used by the dispatch loop
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulePolicy {
    pub daily_limit: u32,
    pub messages_per_minute: u32,
    pub batch_size: u32,
    pub batch_pause: Duration,
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub smart_delay: bool,
    pub night: TimeWindow,
    pub business_hours: Option<TimeWindow>,
    pub delivery_timeout: std::time::Duration,
    pub confirmation_delay: std::time::Duration,
    pub idle_poll: std::time::Duration,
}

impl SchedulePolicy {
    /// Build a policy, failing on any invalid setting
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        config.validate()?;

        let business_hours = if config.respect_business_hours {
            Some(TimeWindow::parse(
                &config.business_hours_start,
                &config.business_hours_end,
            )?)
        } else {
            None
        };

        Ok(Self {
            daily_limit: config.daily_limit,
            messages_per_minute: config.messages_per_minute,
            batch_size: config.batch_size,
            batch_pause: Duration::minutes(config.batch_pause_minutes as i64),
            max_attempts: config.max_attempts,
            retry_delay: Duration::minutes(config.retry_delay_minutes as i64),
            smart_delay: config.enable_smart_delay,
            night: TimeWindow::parse(&config.night_start, &config.night_end)?,
            business_hours,
            delivery_timeout: std::time::Duration::from_secs(config.delivery_timeout_secs),
            confirmation_delay: std::time::Duration::from_secs(config.confirmation_delay_secs),
            idle_poll: std::time::Duration::from_secs(config.idle_poll_secs),
        })
    }

    /// Whether smart delay applies at this local time
    pub fn is_night(&self, now: DateTime<FixedOffset>) -> bool {
        self.smart_delay && self.night.contains(now.time())
    }

    /// Spacing between consecutive items of one enqueue call
    pub fn send_interval(&self, priority: Priority, now: DateTime<FixedOffset>) -> Duration {
        let mut millis = 60_000.0 / self.messages_per_minute as f64 * priority.interval_factor();
        if self.is_night(now) {
            millis *= 2.0;
        }
        Duration::milliseconds(millis.round() as i64)
    }

    /// Scheduled time for the `index`-th item of an enqueue call
    pub fn schedule_for(
        &self,
        index: usize,
        priority: Priority,
        now: DateTime<FixedOffset>,
    ) -> DateTime<Utc> {
        let offset = self.send_interval(priority, now) * index as i32;
        (now + offset).with_timezone(&Utc)
    }

    /// When a transiently failed item becomes eligible again
    pub fn retry_at(&self, now: DateTime<FixedOffset>) -> DateTime<Utc> {
        (now + self.retry_delay).with_timezone(&Utc)
    }

    /// Whether dispatching is allowed at this local time
    pub fn within_business_hours(&self, now: DateTime<FixedOffset>) -> bool {
        match &self.business_hours {
            Some(window) => window.contains(now.time()),
            None => true,
        }
    }

    /// Next time dispatching is allowed
    pub fn next_business_open(&self, now: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
        match &self.business_hours {
            Some(window) => window.next_open(now),
            None => now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(hour: u32, minute: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2024, 3, 4, hour, minute, 0)
            .unwrap()
    }

    fn policy(config: PipelineConfig) -> SchedulePolicy {
        SchedulePolicy::from_config(&config).unwrap()
    }

    #[test]
    fn test_send_interval_by_priority() {
        let p = policy(PipelineConfig {
            messages_per_minute: 60,
            ..Default::default()
        });
        let noon = at(12, 0);

        assert_eq!(p.send_interval(Priority::Normal, noon), Duration::seconds(1));
        assert_eq!(p.send_interval(Priority::High, noon), Duration::milliseconds(500));
        assert_eq!(p.send_interval(Priority::Low, noon), Duration::milliseconds(1500));
    }

    #[test]
    fn test_smart_delay_doubles_interval_at_night() {
        let p = policy(PipelineConfig {
            messages_per_minute: 60,
            enable_smart_delay: true,
            ..Default::default()
        });
        assert_eq!(p.send_interval(Priority::Normal, at(23, 30)), Duration::seconds(2));
        assert_eq!(p.send_interval(Priority::Normal, at(6, 59)), Duration::seconds(2));
        assert_eq!(p.send_interval(Priority::Normal, at(7, 0)), Duration::seconds(1));

        let off = policy(PipelineConfig {
            messages_per_minute: 60,
            enable_smart_delay: false,
            ..Default::default()
        });
        assert_eq!(off.send_interval(Priority::Normal, at(23, 30)), Duration::seconds(1));
    }

    #[test]
    fn test_schedule_for_spaces_items() {
        let p = policy(PipelineConfig {
            messages_per_minute: 30,
            ..Default::default()
        });
        let now = at(10, 0);
        assert_eq!(p.schedule_for(0, Priority::Normal, now), now.with_timezone(&Utc));
        assert_eq!(
            p.schedule_for(3, Priority::Normal, now),
            (now + Duration::seconds(6)).with_timezone(&Utc)
        );
    }

    #[test]
    fn test_business_hours_window() {
        let p = policy(PipelineConfig {
            respect_business_hours: true,
            business_hours_start: "09:00".into(),
            business_hours_end: "18:00".into(),
            ..Default::default()
        });

        assert!(!p.within_business_hours(at(8, 59)));
        assert!(p.within_business_hours(at(9, 0)));
        assert!(!p.within_business_hours(at(18, 0)));

        assert_eq!(p.next_business_open(at(3, 0)), at(9, 0));
        assert_eq!(p.next_business_open(at(19, 0)), at(9, 0) + Duration::days(1));
        assert_eq!(p.next_business_open(at(10, 0)), at(10, 0));
    }

    #[test]
    fn test_overnight_window_wraps() {
        let window = TimeWindow::parse("22:00", "06:00").unwrap();
        assert!(window.contains(at(23, 0).time()));
        assert!(window.contains(at(2, 0).time()));
        assert!(!window.contains(at(12, 0).time()));
        assert_eq!(window.next_open(at(12, 0)), at(22, 0));
    }

    #[test]
    fn test_business_hours_ignored_when_disabled() {
        let p = policy(PipelineConfig::default());
        assert!(p.business_hours.is_none());
        assert!(p.within_business_hours(at(3, 0)));
    }

    #[test]
    fn test_invalid_config_fails_fast() {
        let config = PipelineConfig {
            respect_business_hours: true,
            business_hours_end: "6pm".into(),
            ..Default::default()
        };
        assert!(SchedulePolicy::from_config(&config).is_err());
    }
}
