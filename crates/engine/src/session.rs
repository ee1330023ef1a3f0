use chrono::{DateTime, Duration, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::{OffsetComponents, Tz};

/// Maps wall-clock time onto the broker's server clock.
///
/// Server time runs at a fixed base offset from UTC plus whatever daylight
/// saving shift the reference exchange zone currently applies (the common
/// "GMT+2, GMT+3 in New York summer" convention).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionClock {
    base_offset: Duration,
    dst_reference: Tz,
}

/// Today's bars so far, in server time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Default for SessionClock {
    fn default() -> Self {
        Self::new(2, chrono_tz::America::New_York)
    }
}

impl SessionClock {
    pub fn new(base_offset_hours: i64, dst_reference: Tz) -> Self {
        Self {
            base_offset: Duration::hours(base_offset_hours),
            dst_reference,
        }
    }

    /// Server offset from UTC at `now`.
    pub fn server_offset(&self, now: DateTime<Utc>) -> Duration {
        let dst = self
            .dst_reference
            .offset_from_utc_datetime(&now.naive_utc())
            .dst_offset();
        self.base_offset + dst
    }

    /// The window from the start of the current day up to `now`, truncated
    /// to the minute.
    pub fn window(&self, now: DateTime<Utc>) -> SessionWindow {
        let now = now
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(now);
        let offset = self.server_offset(now);
        let midnight = now.date_naive().and_time(NaiveTime::MIN).and_utc();

        SessionWindow {
            start: midnight + offset,
            end: now + offset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_winter_window() {
        let clock = SessionClock::default();
        let now = Utc.with_ymd_and_hms(2024, 1, 15, 13, 45, 30).unwrap();
        let window = clock.window(now);
        assert_eq!(window.start, Utc.with_ymd_and_hms(2024, 1, 15, 2, 0, 0).unwrap());
        assert_eq!(window.end, Utc.with_ymd_and_hms(2024, 1, 15, 15, 45, 0).unwrap());
    }

    #[test]
    fn test_summer_window() {
        let clock = SessionClock::default();
        let now = Utc.with_ymd_and_hms(2024, 7, 15, 13, 45, 30).unwrap();
        let window = clock.window(now);
        assert_eq!(window.start, Utc.with_ymd_and_hms(2024, 7, 15, 3, 0, 0).unwrap());
        assert_eq!(window.end, Utc.with_ymd_and_hms(2024, 7, 15, 16, 45, 0).unwrap());
    }

    #[test]
    fn test_sub_second_precision_dropped() {
        let clock = SessionClock::new(0, Tz::UTC);
        let now = Utc.with_ymd_and_hms(2024, 1, 15, 8, 0, 59).unwrap() + Duration::milliseconds(999);
        let window = clock.window(now);
        assert_eq!(window.end, Utc.with_ymd_and_hms(2024, 1, 15, 8, 0, 0).unwrap());
        assert_eq!(window.start, Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_server_offset_follows_reference_dst() {
        let clock = SessionClock::new(2, chrono_tz::America::New_York);
        // US DST starts 2024-03-10 at 07:00 UTC.
        let before = Utc.with_ymd_and_hms(2024, 3, 10, 6, 59, 0).unwrap();
        let after = Utc.with_ymd_and_hms(2024, 3, 10, 7, 0, 0).unwrap();
        assert_eq!(clock.server_offset(before), Duration::hours(2));
        assert_eq!(clock.server_offset(after), Duration::hours(3));
    }
}
