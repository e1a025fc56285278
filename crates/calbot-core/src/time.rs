//! Time types for calendar events.
//!
//! [`EventTime`] represents an event boundary (a specific instant or an
//! all-day date) and [`TimeWindow`] a half-open `[start, end)` range used both
//! for provider queries and for the notification scan.

use chrono::{DateTime, Duration, DurationRound, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Display format used in notification text, e.g. `3:04PM`.
pub const CLOCK_FORMAT: &str = "%-I:%M%p";

/// Represents the start or end of a calendar event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum EventTime {
    /// A specific datetime, stored in UTC.
    DateTime(DateTime<Utc>),
    /// An all-day event date (no specific time).
    AllDay(NaiveDate),
}

impl EventTime {
    /// Creates a new `EventTime::DateTime` from a UTC datetime.
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        Self::DateTime(dt)
    }

    /// Creates a new `EventTime::AllDay` from a date.
    pub fn from_date(date: NaiveDate) -> Self {
        Self::AllDay(date)
    }

    /// Returns `true` if this is an all-day event time.
    pub fn is_all_day(&self) -> bool {
        matches!(self, Self::AllDay(_))
    }

    /// Returns the datetime if this is a `DateTime` variant.
    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::DateTime(dt) => Some(*dt),
            Self::AllDay(_) => None,
        }
    }

    /// Converts to a UTC datetime for comparison purposes.
    ///
    /// For all-day events, returns midnight UTC on that date.
    pub fn to_utc_datetime(&self) -> DateTime<Utc> {
        match self {
            Self::DateTime(dt) => *dt,
            Self::AllDay(date) => date.and_time(NaiveTime::MIN).and_utc(),
        }
    }

    /// Renders the time the way notifications show it (`3:04PM`).
    ///
    /// All-day dates render as `all day`.
    pub fn display_clock(&self) -> String {
        match self {
            Self::DateTime(dt) => dt.format(CLOCK_FORMAT).to_string(),
            Self::AllDay(_) => "all day".to_string(),
        }
    }
}

impl PartialOrd for EventTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EventTime {
    fn cmp(&self, other: &Self) -> Ordering {
        self.to_utc_datetime().cmp(&other.to_utc_datetime())
    }
}

/// A half-open interval `[start, end)` in UTC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Start of the window (inclusive).
    pub start: DateTime<Utc>,
    /// End of the window (exclusive).
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Creates a new time window. A reversed pair is swapped.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        if start <= end {
            Self { start, end }
        } else {
            Self {
                start: end,
                end: start,
            }
        }
    }

    /// Creates a time window from a start time and duration.
    pub fn from_duration(start: DateTime<Utc>, duration: Duration) -> Self {
        Self::new(start, start + duration)
    }

    /// Window of events that should be announced on a tick at `now`.
    ///
    /// Starts at `now` truncated to the minute plus `lead` and spans one
    /// scheduler `period` plus [`NOTIFICATION_SLACK_MINUTES`]. Consecutive ticks
    /// therefore overlap, and a tick that runs late still covers the minute
    /// its predecessor did not reach. Callers de-duplicate on event id.
    pub fn notification(now: DateTime<Utc>, lead: Duration, period: Duration) -> Self {
        let threshold = truncate_to_minute(now) + lead;
        Self::from_duration(threshold, period + Duration::minutes(NOTIFICATION_SLACK_MINUTES))
    }

    /// Returns the duration of this time window.
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Checks if a datetime falls within this window.
    pub fn contains(&self, dt: DateTime<Utc>) -> bool {
        self.start <= dt && dt < self.end
    }

    /// Checks if an event time falls within this window.
    ///
    /// All-day dates never match a timed window.
    pub fn contains_event_time(&self, et: &EventTime) -> bool {
        et.as_datetime().is_some_and(|dt| self.contains(dt))
    }
}

/// Extra width of a notification window beyond the tick period, in minutes.
pub const NOTIFICATION_SLACK_MINUTES: i64 = 1;

/// Drops seconds and sub-second precision.
pub fn truncate_to_minute(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt.duration_trunc(Duration::minutes(1)).unwrap_or(dt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, s).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    mod event_time {
        use super::*;

        #[test]
        fn all_day_compares_at_midnight() {
            let timed = EventTime::from_utc(utc(2025, 2, 5, 10, 0, 0));
            let all_day = EventTime::from_date(date(2025, 2, 5));

            assert!(all_day < timed);
            assert_eq!(all_day.to_utc_datetime(), utc(2025, 2, 5, 0, 0, 0));
            assert!(all_day.is_all_day());
            assert_eq!(all_day.as_datetime(), None);
        }

        #[test]
        fn display_clock_uses_twelve_hour_format() {
            let morning = EventTime::from_utc(utc(2025, 2, 5, 9, 5, 0));
            let afternoon = EventTime::from_utc(utc(2025, 2, 5, 15, 4, 0));

            assert_eq!(morning.display_clock(), "9:05AM");
            assert_eq!(afternoon.display_clock(), "3:04PM");
            assert_eq!(
                EventTime::from_date(date(2025, 2, 5)).display_clock(),
                "all day"
            );
        }

        #[test]
        fn serde_shape_is_tagged() {
            let et = EventTime::from_utc(utc(2025, 2, 5, 10, 30, 0));
            let json = serde_json::to_value(&et).unwrap();
            assert_eq!(json["type"], "DateTime");
            assert_eq!(json["value"], "2025-02-05T10:30:00Z");
        }
    }

    mod time_window {
        use super::*;

        #[test]
        fn half_open_bounds() {
            let window = TimeWindow::new(utc(2025, 2, 5, 9, 0, 0), utc(2025, 2, 5, 17, 0, 0));

            assert!(window.contains(utc(2025, 2, 5, 9, 0, 0)));
            assert!(window.contains(utc(2025, 2, 5, 16, 59, 59)));
            assert!(!window.contains(utc(2025, 2, 5, 17, 0, 0)));
            assert!(!window.contains(utc(2025, 2, 5, 8, 59, 59)));
        }

        #[test]
        fn reversed_bounds_are_swapped() {
            let window = TimeWindow::new(utc(2025, 2, 5, 17, 0, 0), utc(2025, 2, 5, 9, 0, 0));
            assert_eq!(window.start, utc(2025, 2, 5, 9, 0, 0));
            assert_eq!(window.duration(), Duration::hours(8));
        }

        #[test]
        fn notification_window_truncates_now() {
            let window = TimeWindow::notification(
                utc(2025, 2, 5, 9, 50, 42),
                Duration::minutes(10),
                Duration::seconds(60),
            );
            assert_eq!(window.start, utc(2025, 2, 5, 10, 0, 0));
            assert_eq!(window.end, utc(2025, 2, 5, 10, 2, 0));
        }

        #[test]
        fn late_tick_across_minute_boundary_leaves_no_gap() {
            let lead = Duration::minutes(10);
            let period = Duration::seconds(60);
            let early = utc(2025, 2, 5, 10, 0, 59) + Duration::milliseconds(999);
            let late = utc(2025, 2, 5, 10, 2, 0) + Duration::milliseconds(1);

            let first = TimeWindow::notification(early, lead, period);
            let second = TimeWindow::notification(late, lead, period);

            assert!(second.start <= first.end);
            assert!(first.contains(utc(2025, 2, 5, 10, 11, 0)));
            assert!(second.contains(utc(2025, 2, 5, 10, 12, 0)));
        }

        #[test]
        fn all_day_never_in_timed_window() {
            let window = TimeWindow::from_duration(utc(2025, 2, 5, 0, 0, 0), Duration::hours(1));
            assert!(!window.contains_event_time(&EventTime::from_date(date(2025, 2, 5))));
            assert!(
                window.contains_event_time(&EventTime::from_utc(utc(2025, 2, 5, 0, 30, 0)))
            );
        }
    }
}
