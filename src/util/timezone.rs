use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;
use time::{OffsetDateTime, UtcOffset};

/// Convert `time` into the wall clock of `tz`.
///
/// Returns `None` when the instant cannot be represented by chrono, so callers
/// can pick their own fallback instead of panicking.
pub fn localized_datetime(time: OffsetDateTime, tz: Tz) -> Option<DateTime<Tz>> {
    let datetime_utc = DateTime::<Utc>::from_timestamp(time.unix_timestamp(), time.nanosecond())?;
    Some(tz.from_utc_datetime(&datetime_utc.naive_utc()))
}

/// Shift `time` to a fixed offset, keeping the original value when the shifted
/// date would fall outside the supported calendar range.
pub fn shift_to_offset(time: OffsetDateTime, offset: UtcOffset) -> OffsetDateTime {
    time.checked_to_offset(offset).unwrap_or(time)
}
