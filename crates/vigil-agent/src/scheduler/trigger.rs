//! Calendar-aware trigger for per-item cadence.
//!
//! Windows are matched against the local wall clock (day-of-week Monday=1,
//! time-of-day with strict bounds); the fire-time arithmetic is anchored on
//! the last completion. Both operations take the clock as a parameter so the
//! protocol is testable without sleeping.

use chrono::{DateTime, Datelike, Duration, Local, NaiveTime, Timelike};

use vigil_common::types::{CustomInterval, MonitorItem};

/// Tasks that fire outside every window re-arm after this instead of
/// recomputing a full fire time, so tight calendars cannot busy-loop.
pub const OUT_OF_WINDOW_RETRY: std::time::Duration = std::time::Duration::from_secs(60);

pub struct CustomTrigger {
    intervals: Vec<CustomInterval>,
    default_interval_secs: u32,
}

impl CustomTrigger {
    pub fn for_item(item: &MonitorItem) -> Self {
        Self {
            intervals: item.intervals.clone(),
            default_interval_secs: item.interval_secs,
        }
    }

    /// Compute the next fire time, or `None` when the item has no usable
    /// schedule.
    ///
    /// The base of the arithmetic is `last_completion` when present, else
    /// `now`. Window matching always uses `now`: the first window containing
    /// the current local moment supplies the interval; otherwise the default
    /// interval applies when positive.
    pub fn next_fire_time(
        &self,
        last_completion: Option<DateTime<Local>>,
        now: DateTime<Local>,
    ) -> Option<DateTime<Local>> {
        let base = last_completion.unwrap_or(now);
        let (day, time) = local_day_and_time(now);

        if self.intervals.is_empty() {
            if self.default_interval_secs > 0 {
                return Some(base + Duration::seconds(self.default_interval_secs as i64));
            }
            return None;
        }

        for interval in &self.intervals {
            if interval.contains(day, time) && interval.interval_secs > 0 {
                return Some(base + Duration::seconds(interval.interval_secs as i64));
            }
        }

        if self.default_interval_secs > 0 {
            return Some(base + Duration::seconds(self.default_interval_secs as i64));
        }
        None
    }

    /// Whether the current moment is executable: always when no windows are
    /// configured, otherwise only strictly inside some window.
    pub fn should_execute_now(&self, now: DateTime<Local>) -> bool {
        if self.intervals.is_empty() {
            return true;
        }
        let (day, time) = local_day_and_time(now);
        self.intervals.iter().any(|iv| iv.contains(day, time))
    }
}

fn local_day_and_time(now: DateTime<Local>) -> (u8, NaiveTime) {
    let day = now.weekday().number_from_monday() as u8;
    // Window bounds are whole seconds; truncate so "now" inside a window is
    // not pushed past an end bound by sub-second noise.
    let time = now
        .time()
        .with_nanosecond(0)
        .unwrap_or_else(|| now.time());
    (day, time)
}
