use crate::models::{AppSettings, Freshness};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike, Utc};

pub const DAY_SHIFT_START_HOUR: u32 = 7;
pub const NIGHT_SHIFT_START_HOUR: u32 = 19;

/// Start of the shift that contains `now`, in `now`'s own time zone.
///
/// Shifts turn over at 07:00 and 19:00 local time; before 07:00 the night
/// shift that began at 19:00 on the previous day is still running.
pub fn current_shift_start<Tz: TimeZone>(now: &DateTime<Tz>) -> DateTime<Tz> {
    let local = now.naive_local();
    let today = local.date();
    let target = if local.hour() >= NIGHT_SHIFT_START_HOUR {
        at_hour(today, NIGHT_SHIFT_START_HOUR)
    } else if local.hour() >= DAY_SHIFT_START_HOUR {
        at_hour(today, DAY_SHIFT_START_HOUR)
    } else {
        at_hour(today - Duration::days(1), NIGHT_SHIFT_START_HOUR)
    };

    now.timezone()
        .from_local_datetime(&target)
        .earliest()
        .unwrap_or_else(|| now.clone() - (local - target))
}

fn at_hour(date: NaiveDate, hour: u32) -> NaiveDateTime {
    date.and_time(NaiveTime::MIN) + Duration::hours(i64::from(hour))
}

pub fn classify_freshness(
    last_write: DateTime<Utc>,
    now: DateTime<Utc>,
    settings: &AppSettings,
) -> Freshness {
    let hours = (now - last_write).num_milliseconds() as f64 / 3_600_000.0;
    if hours < f64::from(settings.fresh_within_hours) {
        Freshness::Fresh
    } else if hours >= f64::from(settings.stale_after_hours) {
        Freshness::Stale
    } else {
        Freshness::Normal
    }
}

/// Operator-facing line describing how long ago the store last changed.
pub fn describe_freshness(
    last_write: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    settings: &AppSettings,
) -> (Option<Freshness>, String) {
    let Some(last_write) = last_write else {
        return (
            None,
            "Waiting for the first save to record the update time.".to_string(),
        );
    };

    let freshness = classify_freshness(last_write, now, settings);
    let hours = ((now - last_write).num_minutes() as f64 / 60.0).round() as i64;
    let message = match freshness {
        Freshness::Fresh => format!(
            "Last change less than {} hour(s) ago. Records were updated by the current shift.",
            settings.fresh_within_hours
        ),
        Freshness::Normal => format!("Last change {} hour(s) ago.", hours),
        Freshness::Stale => format!(
            "ATTENTION: records have not been updated for {} hours. Check that the shift handover happened.",
            hours
        ),
    };
    (Some(freshness), message)
}
