use chrono::{Datelike, Duration, NaiveDate, TimeZone};
use chrono_tz::Tz;

use crate::model::{DayHours, Ms, TimeRange, WeekSchedule, Weekday};

use super::EngineError;
use super::interval::IntervalSet;

/// Parse `"HH:mm"` into minutes from midnight.
pub fn parse_hhmm(s: &str) -> Result<u16, EngineError> {
    let (h, m) = s
        .split_once(':')
        .ok_or(EngineError::InvalidSchedule("expected HH:mm"))?;
    let hours: u16 = h
        .parse()
        .map_err(|_| EngineError::InvalidSchedule("bad hour in HH:mm"))?;
    let minutes: u16 = m
        .parse()
        .map_err(|_| EngineError::InvalidSchedule("bad minute in HH:mm"))?;
    if hours > 23 || minutes > 59 {
        return Err(EngineError::InvalidSchedule("HH:mm out of range"));
    }
    Ok(hours * 60 + minutes)
}

/// Build a validated opening window from `"HH:mm"` strings. Overnight
/// windows (close <= open) are not supported.
pub fn day_hours(open: &str, close: &str) -> Result<DayHours, EngineError> {
    let open_minute = parse_hhmm(open)?;
    let close_minute = parse_hhmm(close)?;
    if close_minute <= open_minute {
        return Err(EngineError::InvalidSchedule("close must be after open"));
    }
    Ok(DayHours {
        open_minute,
        close_minute,
    })
}

/// Resolve a wall-clock minute on `date` in `tz` to a UTC instant.
/// DST folds take the earlier instant; a minute that falls into a
/// spring-forward gap shifts one hour later.
fn local_minute_to_ms(date: NaiveDate, minute: u16, tz: Tz) -> Option<Ms> {
    let naive = date.and_hms_opt(u32::from(minute / 60), u32::from(minute % 60), 0)?;
    match tz.from_local_datetime(&naive) {
        chrono::LocalResult::Single(dt) => Some(dt.timestamp_millis()),
        chrono::LocalResult::Ambiguous(earlier, _) => Some(earlier.timestamp_millis()),
        chrono::LocalResult::None => tz
            .from_local_datetime(&(naive + Duration::hours(1)))
            .earliest()
            .map(|dt| dt.timestamp_millis()),
    }
}

/// Opening hours for `date` per the weekly schedule, as an IntervalSet in
/// absolute time. Empty if the location is closed that weekday.
pub fn open_hours(schedule: &WeekSchedule, date: NaiveDate, tz: Tz) -> IntervalSet {
    let day = Weekday::from_chrono(date.weekday());
    let Some(hours) = schedule.get(day) else {
        return IntervalSet::empty();
    };
    let Some(start) = local_minute_to_ms(date, hours.open_minute, tz) else {
        return IntervalSet::empty();
    };
    let Some(end) = local_minute_to_ms(date, hours.close_minute, tz) else {
        return IntervalSet::empty();
    };
    if start >= end {
        // DST edge collapsed the window to nothing
        return IntervalSet::empty();
    }
    IntervalSet::normalize(vec![TimeRange::new(start, end)])
}
