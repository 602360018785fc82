//! US equity trading-session oracle.
//!
//! Answers a single question: is the regular session open at a given instant?
//! Weekends are closed and the session runs 09:30 (inclusive) to 16:00
//! (exclusive) in the exchange's local time. Market holidays are not modelled;
//! a holiday that falls on a weekday reports as open.

use std::fmt;

use chrono::{Datelike, Timelike, Weekday};
use chrono_tz::Tz;
use time::macros::offset;
use time::{OffsetDateTime, UtcOffset};
use tracing::warn;

use crate::util::timezone::{localized_datetime, shift_to_offset};

pub const US_EQUITIES_TIMEZONE: &str = "America/New_York";

/// Used whenever the named zone is unavailable. Eastern standard time.
const FALLBACK_OFFSET: UtcOffset = offset!(-5);

const SESSION_OPEN_MINUTE: u32 = 9 * 60 + 30;
const SESSION_CLOSE_MINUTE: u32 = 16 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketSession {
    Open,
    Closed,
}

impl MarketSession {
    pub fn as_str(self) -> &'static str {
        match self {
            MarketSession::Open => "open",
            MarketSession::Closed => "closed",
        }
    }
}

impl fmt::Display for MarketSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionZone {
    Named(Tz),
    Fixed(UtcOffset),
}

/// Wall-clock reading used for the session check.
struct LocalClock {
    weekend: bool,
    minute_of_day: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarketCalendar {
    zone: SessionZone,
}

impl MarketCalendar {
    /// Build a calendar for the IANA zone `timezone`.
    ///
    /// An unknown zone never fails construction: the calendar logs a warning
    /// and evaluates sessions at a fixed UTC-05:00 offset instead.
    pub fn new(timezone: &str) -> Self {
        match timezone.trim().parse::<Tz>() {
            Ok(tz) => Self {
                zone: SessionZone::Named(tz),
            },
            Err(err) => {
                warn!(
                    target = "stockdesk::market",
                    timezone,
                    error = %err,
                    fallback_offset = ?FALLBACK_OFFSET,
                    "unknown market timezone; using fixed offset"
                );
                Self::fixed(FALLBACK_OFFSET)
            }
        }
    }

    pub fn us_equities() -> Self {
        Self {
            zone: SessionZone::Named(Tz::America__New_York),
        }
    }

    pub fn fixed(offset: UtcOffset) -> Self {
        Self {
            zone: SessionZone::Fixed(offset),
        }
    }

    pub fn is_open(&self, at: OffsetDateTime) -> bool {
        let clock = self.local_clock(at);
        !clock.weekend
            && (SESSION_OPEN_MINUTE..SESSION_CLOSE_MINUTE).contains(&clock.minute_of_day)
    }

    pub fn session(&self, at: OffsetDateTime) -> MarketSession {
        if self.is_open(at) {
            MarketSession::Open
        } else {
            MarketSession::Closed
        }
    }

    fn local_clock(&self, at: OffsetDateTime) -> LocalClock {
        match self.zone {
            SessionZone::Named(tz) => match localized_datetime(at, tz) {
                Some(local) => LocalClock {
                    weekend: matches!(local.weekday(), Weekday::Sat | Weekday::Sun),
                    minute_of_day: local.hour() * 60 + local.minute(),
                },
                None => fixed_clock(at, FALLBACK_OFFSET),
            },
            SessionZone::Fixed(offset) => fixed_clock(at, offset),
        }
    }
}

impl Default for MarketCalendar {
    fn default() -> Self {
        Self::us_equities()
    }
}

fn fixed_clock(at: OffsetDateTime, offset: UtcOffset) -> LocalClock {
    let local = shift_to_offset(at, offset);
    LocalClock {
        weekend: matches!(
            local.weekday(),
            time::Weekday::Saturday | time::Weekday::Sunday
        ),
        minute_of_day: u32::from(local.hour()) * 60 + u32::from(local.minute()),
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    #[test]
    fn opening_minute_is_inclusive() {
        let calendar = MarketCalendar::us_equities();
        // Monday 2024-01-08, EST (UTC-5)
        assert!(calendar.is_open(datetime!(2024-01-08 14:30 UTC)));
        assert!(!calendar.is_open(datetime!(2024-01-08 14:29 UTC)));
        assert!(!calendar.is_open(datetime!(2024-01-08 14:29:59 UTC)));
    }

    #[test]
    fn closing_minute_is_exclusive() {
        let calendar = MarketCalendar::us_equities();
        assert!(calendar.is_open(datetime!(2024-01-08 20:59:59 UTC)));
        assert!(!calendar.is_open(datetime!(2024-01-08 21:00 UTC)));
        assert!(!calendar.is_open(datetime!(2024-01-08 23:30 UTC)));
    }

    #[test]
    fn weekends_are_closed() {
        let calendar = MarketCalendar::us_equities();
        assert!(!calendar.is_open(datetime!(2024-03-09 15:00 UTC)));
        assert!(!calendar.is_open(datetime!(2024-03-10 15:00 UTC)));
        assert!(calendar.is_open(datetime!(2024-03-11 15:00 UTC)));
    }

    #[test]
    fn daylight_saving_shift_moves_the_session() {
        let calendar = MarketCalendar::us_equities();
        // Friday before the switch: 13:30 UTC is 08:30 EST.
        assert!(!calendar.is_open(datetime!(2024-03-08 13:30 UTC)));
        // Monday after the switch: 13:30 UTC is 09:30 EDT.
        assert!(calendar.is_open(datetime!(2024-03-11 13:30 UTC)));
        // 20:00 UTC is 16:00 EDT, already closed.
        assert!(!calendar.is_open(datetime!(2024-03-11 20:00 UTC)));
    }

    #[test]
    fn local_offsets_are_respected() {
        let calendar = MarketCalendar::us_equities();
        assert!(calendar.is_open(datetime!(2024-01-08 09:30 -05:00)));
        assert!(calendar.is_open(datetime!(2024-01-08 15:30 +01:00)));
    }

    #[test]
    fn unknown_zone_falls_back_to_fixed_offset() {
        let calendar = MarketCalendar::new("Mars/Olympus_Mons");
        assert_eq!(calendar, MarketCalendar::fixed(offset!(-5)));
        assert!(calendar.is_open(datetime!(2024-01-08 14:30 UTC)));
        // No daylight saving under the fixed offset.
        assert!(!calendar.is_open(datetime!(2024-03-11 13:30 UTC)));
    }

    #[test]
    fn holidays_are_not_modelled() {
        let calendar = MarketCalendar::us_equities();
        // Independence Day 2024 was a Thursday.
        assert!(calendar.is_open(datetime!(2024-07-04 15:00 UTC)));
    }

    #[test]
    fn session_reports_state() {
        let calendar = MarketCalendar::default();
        assert_eq!(
            calendar.session(datetime!(2024-01-08 15:00 UTC)),
            MarketSession::Open
        );
        assert_eq!(
            calendar.session(datetime!(2024-01-06 15:00 UTC)).as_str(),
            "closed"
        );
    }
}
