use chrono::{DateTime, Datelike, Months, Offset, TimeZone, Utc};
use chrono_tz::Tz;
use log::debug;
use serde::{Deserialize, Serialize};

/// Seconds in one day, for callers building day-based periods.
pub const SECONDS_PER_DAY: i64 = 86_400;

/// A recurring schedule: a first run plus either a period in seconds or a
/// period in whole months. When `period_months > 0` it governs and `period`
/// is ignored. Both zero means the schedule runs once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurrenceSpec {
    pub first_time: i64, // Unix timestamp (UTC), 0 = never scheduled
    pub period: i64,
    pub period_months: i64,
}

impl RecurrenceSpec {
    pub fn new(first_time: i64, period: i64, period_months: i64) -> Self {
        RecurrenceSpec {
            first_time,
            period,
            period_months,
        }
    }

    pub fn is_recurring(&self) -> bool {
        self.period_months > 0 || self.period > 0
    }

    /// Calculate the first occurrence strictly after `now`.
    ///
    /// Returns 0 when the schedule has no first time, or when a one-shot
    /// schedule has already run. The number of elapsed periods is computed
    /// directly, so schedules that started long ago cost the same as new ones.
    pub fn next_occurrence(&self, now: i64) -> i64 {
        if self.first_time == 0 {
            return 0;
        }

        if self.first_time > now {
            return self.first_time;
        }

        if !self.is_recurring() {
            // One-shot schedule that is already in the past
            return 0;
        }

        if self.period_months > 0 {
            let elapsed = months_between(self.first_time, now);
            let periods = elapsed / self.period_months + 1;
            return periods
                .checked_mul(self.period_months)
                .and_then(|months| add_months(self.first_time, months))
                .unwrap_or(0);
        }

        let periods = (now - self.first_time) / self.period + 1;
        periods
            .checked_mul(self.period)
            .and_then(|offset| self.first_time.checked_add(offset))
            .unwrap_or(0)
    }
}

fn to_utc(time: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(time, 0).single()
}

/// Add `months` calendar months to a timestamp, working in UTC.
///
/// The time of day is preserved. When the day does not exist in the target
/// month the last day of that month is used, so Jan 31 + 1 month is Feb 28
/// (or 29) rather than an overflow into March.
pub fn add_months(time: i64, months: i64) -> Option<i64> {
    let dt = to_utc(time)?;
    let count = u32::try_from(months.unsigned_abs()).ok()?;

    let shifted = if months >= 0 {
        dt.checked_add_months(Months::new(count))?
    } else {
        dt.checked_sub_months(Months::new(count))?
    };

    Some(shifted.timestamp())
}

/// Count the whole months from `start` to `end`: the largest `m` for which
/// `add_months(start, m) <= end`. Returns 0 when `end` precedes `start`.
pub fn months_between(start: i64, end: i64) -> i64 {
    if end <= start {
        return 0;
    }

    let (Some(from), Some(to)) = (to_utc(start), to_utc(end)) else {
        return 0;
    };

    let mut months = (i64::from(to.year()) - i64::from(from.year())) * 12
        + (i64::from(to.month()) - i64::from(from.month()));

    // The calendar difference overshoots by one when `end` falls earlier in
    // its month than `start` does in its own.
    while months > 0 && add_months(start, months).map_or(true, |t| t > end) {
        months -= 1;
    }

    months
}

/// Offset from UTC, in minutes, of `zone` at the given instant.
///
/// An empty zone means UTC. Unknown zone names are treated as UTC.
pub fn utc_offset_at(zone: &str, time: i64) -> i32 {
    let zone = zone.trim();
    if zone.is_empty() {
        return 0;
    }

    let tz: Tz = match zone.parse() {
        Ok(tz) => tz,
        Err(_) => {
            debug!("Unknown timezone '{}', using UTC", zone);
            return 0;
        }
    };

    match to_utc(time) {
        Some(dt) => dt.with_timezone(&tz).offset().fix().local_minus_utc() / 60,
        None => 0,
    }
}

/// Offset from UTC, in minutes, of `zone` right now, daylight saving included.
pub fn current_utc_offset(zone: &str) -> i32 {
    utc_offset_at(zone, Utc::now().timestamp())
}

/// The current time as a Unix timestamp.
pub fn now() -> i64 {
    Utc::now().timestamp()
}
