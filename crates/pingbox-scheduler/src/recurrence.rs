//! Recurrence scheduler: next trigger instant for a reminder.
//!
//! Calendar kinds are evaluated in the user's local timezone and converted
//! back to UTC, so "09:00" and "the 31st" mean what the user sees.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use chrono_tz::Tz;

use pingbox_core::types::{DAYS_IN_WEEK, MINUTES_IN_DAY, MINUTES_IN_HOUR, Recurrence};

use crate::window::{at_minute, local_to_utc};

/// Compute the next instant `recurrence` should fire after `now`.
///
/// Returns `None` when the descriptor is unusable (zero interval, time of day
/// past 23:59, weekday past 6, month day outside 1..=31, unset one-shot time).
/// Callers disable or refuse such reminders rather than guess.
pub fn compute_next(recurrence: &Recurrence, now: DateTime<Utc>, tz: &Tz) -> Option<DateTime<Utc>> {
    match *recurrence {
        Recurrence::Interval { minutes } => {
            if minutes == 0 {
                return None;
            }
            Some(now + Duration::minutes(i64::from(minutes)))
        }
        Recurrence::Daily { minute_of_day } => {
            valid_time_of_day(minute_of_day)?;
            let today = now.with_timezone(tz).date_naive();
            let target = local_to_utc(tz, at_minute(today, minute_of_day));
            if target > now {
                Some(target)
            } else {
                Some(local_to_utc(tz, at_minute(today + Duration::days(1), minute_of_day)))
            }
        }
        Recurrence::Weekly { weekday, minute_of_day } => {
            valid_time_of_day(minute_of_day)?;
            if weekday >= DAYS_IN_WEEK {
                return None;
            }
            let today = now.with_timezone(tz).date_naive();
            let current = today.weekday().num_days_from_sunday();
            let week = u32::from(DAYS_IN_WEEK);
            let days_until = (u32::from(weekday) + week - current) % week;
            let target_date = today + Duration::days(i64::from(days_until));
            let target = local_to_utc(tz, at_minute(target_date, minute_of_day));
            if target > now {
                Some(target)
            } else {
                Some(local_to_utc(
                    tz,
                    at_minute(target_date + Duration::days(i64::from(week)), minute_of_day),
                ))
            }
        }
        Recurrence::Monthly { day, minute_of_day } => {
            valid_time_of_day(minute_of_day)?;
            if !(1..=31).contains(&day) {
                return None;
            }
            let today = now.with_timezone(tz).date_naive();
            let this_month = clamped_month_day(today.year(), today.month(), day)?;
            let target = local_to_utc(tz, at_minute(this_month, minute_of_day));
            if target > now {
                return Some(target);
            }
            // Re-clamp from the requested day, not from this month's clamp.
            let (year, month) = if today.month() == 12 {
                (today.year() + 1, 1)
            } else {
                (today.year(), today.month() + 1)
            };
            let next_month = clamped_month_day(year, month, day)?;
            Some(local_to_utc(tz, at_minute(next_month, minute_of_day)))
        }
        Recurrence::Once { at } => {
            if at.timestamp() == 0 {
                None
            } else {
                Some(at)
            }
        }
    }
}

fn valid_time_of_day(minute_of_day: u16) -> Option<()> {
    (minute_of_day < MINUTES_IN_DAY).then_some(())
}

/// Number of days in `month` of `year`.
pub fn days_in_month(year: i32, month: u32) -> u32 {
    let first_of_next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    };
    first_of_next
        .and_then(|d| d.pred_opt())
        .map(|d| d.day())
        .unwrap_or(28)
}

fn clamped_month_day(year: i32, month: u32, day: u8) -> Option<NaiveDate> {
    let day = u32::from(day).min(days_in_month(year, month));
    NaiveDate::from_ymd_opt(year, month, day)
}

/// `"HH:MM"` for a minute-of-day.
pub fn format_hm(minute_of_day: u16) -> String {
    format!(
        "{:02}:{:02}",
        minute_of_day / MINUTES_IN_HOUR,
        minute_of_day % MINUTES_IN_HOUR
    )
}

const WEEKDAY_SHORT: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

/// Short human description of a schedule, in the user's timezone.
pub fn describe(recurrence: &Recurrence, tz: &Tz) -> String {
    match *recurrence {
        Recurrence::Once { at } => {
            format!("once at {}", at.with_timezone(tz).format("%d.%m %H:%M"))
        }
        Recurrence::Interval { minutes } => format!("every {minutes} min"),
        Recurrence::Daily { minute_of_day } => format!("daily at {}", format_hm(minute_of_day)),
        Recurrence::Weekly { weekday, minute_of_day } => format!(
            "every {} at {}",
            WEEKDAY_SHORT[usize::from(weekday) % WEEKDAY_SHORT.len()],
            format_hm(minute_of_day)
        ),
        Recurrence::Monthly { day, minute_of_day } => {
            format!("monthly on day {day} at {}", format_hm(minute_of_day))
        }
    }
}
