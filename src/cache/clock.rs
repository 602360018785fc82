//! Wall-clock source for TTL evaluation.

use std::sync::Mutex;

use time::{Duration, OffsetDateTime};

use super::lock::mutex_lock;

const SOURCE: &str = "cache::clock";

pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<OffsetDateTime>,
}

impl ManualClock {
    pub fn new(start: OffsetDateTime) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, at: OffsetDateTime) {
        *mutex_lock(&self.now, SOURCE, "set") = at;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = mutex_lock(&self.now, SOURCE, "advance");
        *now = now.saturating_add(by);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> OffsetDateTime {
        *mutex_lock(&self.now, SOURCE, "now")
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    #[test]
    fn manual_clock_moves_only_on_request() {
        let clock = ManualClock::new(datetime!(2024-01-08 15:00 UTC));
        assert_eq!(clock.now(), datetime!(2024-01-08 15:00 UTC));

        clock.advance(Duration::minutes(5));
        assert_eq!(clock.now(), datetime!(2024-01-08 15:05 UTC));

        clock.set(datetime!(2024-01-09 09:00 UTC));
        assert_eq!(clock.now(), datetime!(2024-01-09 09:00 UTC));
    }
}
