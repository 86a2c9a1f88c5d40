//! Active-window policy: the local hours during which a user may be pinged.
//!
//! A window is a pair of minutes-of-day. When `start > end` the window wraps
//! past midnight (e.g. 22:00–02:00). Both boundaries are inside the window.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use rand::Rng;

use pingbox_core::types::{DEFAULT_DAY_END, DEFAULT_DAY_START, MINUTES_IN_DAY, User};

/// A user's allowed notification hours, in local minutes-of-day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveWindow {
    pub start: u16,
    pub end: u16,
}

impl Default for ActiveWindow {
    fn default() -> Self {
        Self {
            start: DEFAULT_DAY_START,
            end: DEFAULT_DAY_END,
        }
    }
}

impl ActiveWindow {
    /// Build a window, replacing out-of-range or degenerate (`start == end`)
    /// values with the default 12:00–22:00.
    pub fn normalized(start: i64, end: i64) -> Self {
        let day = i64::from(MINUTES_IN_DAY);
        if !(0..=day).contains(&start) || !(0..=day).contains(&end) || start == end {
            return Self::default();
        }
        // Both values were range-checked above.
        Self {
            start: start as u16,
            end: end as u16,
        }
    }

    pub fn for_user(user: &User) -> Self {
        Self::normalized(i64::from(user.day_start), i64::from(user.day_end))
    }

    /// Whether a raw start/end pair is a usable window as given.
    pub fn is_valid(start: i64, end: i64) -> bool {
        let day = i64::from(MINUTES_IN_DAY);
        (0..=day).contains(&start) && (0..=day).contains(&end) && start != end
    }

    pub fn wraps(&self) -> bool {
        self.start > self.end
    }

    /// Inclusive at both boundaries, wrapping or not.
    pub fn contains(&self, minute_of_day: u16) -> bool {
        if self.wraps() {
            minute_of_day >= self.start || minute_of_day <= self.end
        } else {
            self.start <= minute_of_day && minute_of_day <= self.end
        }
    }

    /// Whether a local instant falls inside the window.
    pub fn contains_local<T: TimeZone>(&self, local: &DateTime<T>) -> bool {
        self.contains(local_minute_of_day(local))
    }

    pub fn span_minutes(&self) -> u32 {
        let (start, end) = (u32::from(self.start), u32::from(self.end));
        if self.wraps() {
            u32::from(MINUTES_IN_DAY) - start + end
        } else {
            end - start
        }
    }

    /// Next window start strictly after `from_local`, plus a random jitter of
    /// `0..=min(jitter_cap, span)` minutes.
    pub fn next_start(&self, from_local: &DateTime<Tz>, jitter_cap_minutes: u32) -> DateTime<Utc> {
        let bound = jitter_cap_minutes.min(self.span_minutes());
        let jitter = if bound > 0 {
            rand::thread_rng().gen_range(0..=bound)
        } else {
            0
        };
        self.next_start_with_jitter(from_local, jitter)
    }

    /// [`next_start`](Self::next_start) with a fixed jitter.
    pub fn next_start_with_jitter(&self, from_local: &DateTime<Tz>, jitter_minutes: u32) -> DateTime<Utc> {
        let tz = from_local.timezone();
        let today = from_local.date_naive();
        let mut candidate = local_to_utc(&tz, at_minute(today, self.start));
        if candidate <= from_local.with_timezone(&Utc) {
            candidate = local_to_utc(&tz, at_minute(today + Duration::days(1), self.start));
        }
        candidate + Duration::minutes(i64::from(jitter_minutes))
    }

    /// Move `minutes` to the nearer window boundary when it lies outside.
    ///
    /// Distance is measured on the 1440-minute circle; ties go to `start`.
    /// Returns the (possibly unchanged) value and whether it moved.
    pub fn clamp(&self, minutes: u16) -> (u16, bool) {
        if self.start == self.end {
            return (self.start, true);
        }
        if self.contains(minutes) {
            return (minutes, false);
        }
        let to_start = circular_distance(minutes, self.start);
        let to_end = circular_distance(minutes, self.end);
        if to_start <= to_end {
            (self.start, true)
        } else {
            (self.end, true)
        }
    }
}

fn circular_distance(a: u16, b: u16) -> u16 {
    let diff = a.abs_diff(b) % MINUTES_IN_DAY;
    diff.min(MINUTES_IN_DAY - diff)
}

/// Resolve a stored timezone name.
///
/// Empty means `default`; anything that does not parse falls back to UTC.
pub fn resolve_timezone(name: &str, default: &str) -> Tz {
    let trimmed = name.trim();
    let candidate = if trimmed.is_empty() { default.trim() } else { trimmed };
    match candidate.parse::<Tz>() {
        Ok(tz) => tz,
        Err(_) => {
            tracing::warn!("⚠️ Unknown timezone '{}', using UTC", candidate);
            Tz::UTC
        }
    }
}

/// Minutes since local midnight.
pub fn local_minute_of_day<T: TimeZone>(local: &DateTime<T>) -> u16 {
    // hour < 24 and minute < 60, so this always fits.
    (local.hour() * 60 + local.minute()) as u16
}

/// Local midnight of `date` plus `minutes`. 1440 lands on the next midnight.
pub fn at_minute(date: NaiveDate, minutes: u16) -> NaiveDateTime {
    date.and_time(NaiveTime::MIN) + Duration::minutes(i64::from(minutes))
}

/// Convert a local wall-clock time to UTC.
///
/// Ambiguous times (clocks going back) take the earlier instant; times that
/// do not exist (clocks going forward) are shifted one hour later.
pub fn local_to_utc(tz: &Tz, naive: NaiveDateTime) -> DateTime<Utc> {
    if let Some(t) = tz.from_local_datetime(&naive).earliest() {
        return t.with_timezone(&Utc);
    }
    match tz.from_local_datetime(&(naive + Duration::hours(1))).earliest() {
        Some(t) => t.with_timezone(&Utc),
        None => Utc.from_utc_datetime(&naive),
    }
}
