//! Domain types: users, items, reminders and the message log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{PingBoxError, Result};

pub type UserId = i64;
pub type ItemId = i64;
pub type ReminderId = i64;

pub const MINUTES_IN_HOUR: u16 = 60;
pub const MINUTES_IN_DAY: u16 = 1440;
pub const DAYS_IN_WEEK: u8 = 7;

pub const DEFAULT_DAY_START: u16 = 12 * MINUTES_IN_HOUR;
pub const DEFAULT_DAY_END: u16 = 22 * MINUTES_IN_HOUR;
pub const DEFAULT_TIMEZONE: &str = "Europe/Moscow";

// ─── Users ───────────────────────────────────────────────────────────────────

/// Tone the generated messages should take.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserMode {
    #[default]
    Cozy,
    Rofl,
    Care,
}

impl UserMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserMode::Cozy => "cozy",
            UserMode::Rofl => "rofl",
            UserMode::Care => "care",
        }
    }

    /// Unknown values fall back to `Cozy`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "rofl" | "rofl_mode" => UserMode::Rofl,
            "care" | "care_mode" => UserMode::Care,
            _ => UserMode::Cozy,
        }
    }
}

impl std::fmt::Display for UserMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named min/max range for ambient notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotificationPreset {
    pub key: &'static str,
    pub min_minutes: u32,
    pub max_minutes: u32,
}

pub const DEFAULT_PRESET: &str = "normal";

pub const PRESETS: &[NotificationPreset] = &[
    NotificationPreset { key: "rare", min_minutes: 120, max_minutes: 240 },
    NotificationPreset { key: "normal", min_minutes: 60, max_minutes: 120 },
    NotificationPreset { key: "often", min_minutes: 40, max_minutes: 90 },
    NotificationPreset { key: "chaos", min_minutes: 30, max_minutes: 180 },
];

impl NotificationPreset {
    pub fn find(key: &str) -> Option<&'static NotificationPreset> {
        PRESETS.iter().find(|p| p.key == key.trim())
    }

    pub fn default_preset() -> &'static NotificationPreset {
        // "normal" is always present in PRESETS.
        &PRESETS[1]
    }
}

/// A chat subject that owns items and reminders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Chat identifier; also the delivery address.
    pub id: UserId,
    pub mode: UserMode,
    /// IANA timezone name. Empty means "use the configured default".
    pub timezone: String,
    /// Active window start, minutes from local midnight (0..=1440).
    pub day_start: u16,
    /// Active window end, minutes from local midnight (0..=1440).
    pub day_end: u16,
    /// Named preset; takes precedence over the explicit range.
    pub notification_preset: Option<String>,
    pub interval_min_minutes: u32,
    pub interval_max_minutes: u32,
    pub muted: bool,
    /// Next ambient notification. `None` means never scheduled.
    pub next_notification: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// A freshly activated user with default preferences.
    pub fn new(id: UserId, timezone: &str, day_start: u16, day_end: u16, preset: &str) -> Self {
        let preset = NotificationPreset::find(preset).unwrap_or(NotificationPreset::default_preset());
        Self {
            id,
            mode: UserMode::default(),
            timezone: timezone.to_string(),
            day_start,
            day_end,
            notification_preset: Some(preset.key.to_string()),
            interval_min_minutes: preset.min_minutes,
            interval_max_minutes: preset.max_minutes,
            muted: false,
            next_notification: None,
            created_at: Utc::now(),
        }
    }

    /// Effective (min, max) notification interval in minutes.
    ///
    /// Preset wins when it names a known preset; otherwise the explicit range
    /// if it is well-formed; otherwise the default preset.
    pub fn notification_range(&self) -> (u32, u32) {
        if let Some(p) = self.notification_preset.as_deref().and_then(NotificationPreset::find) {
            return (p.min_minutes, p.max_minutes);
        }
        let (min, max) = (self.interval_min_minutes, self.interval_max_minutes);
        if min > 0 && max >= min {
            return (min, max);
        }
        let p = NotificationPreset::default_preset();
        (p.min_minutes, p.max_minutes)
    }
}

// ─── Items ───────────────────────────────────────────────────────────────────

/// Something the user wants to be nudged about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub user_id: UserId,
    /// Normalized: trimmed, lower-cased, single spaces.
    pub name: String,
}

/// Append-only record of a sent ambient notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageLog {
    pub user_id: UserId,
    pub item_id: ItemId,
    pub sent_at: DateTime<Utc>,
    pub text: String,
}

// ─── Reminders ───────────────────────────────────────────────────────────────

/// Storage tag for a recurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecurrenceKind {
    Once,
    Interval,
    Daily,
    Weekly,
    Monthly,
}

impl RecurrenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecurrenceKind::Once => "once",
            RecurrenceKind::Interval => "interval",
            RecurrenceKind::Daily => "daily",
            RecurrenceKind::Weekly => "weekly",
            RecurrenceKind::Monthly => "monthly",
        }
    }
}

impl std::str::FromStr for RecurrenceKind {
    type Err = PingBoxError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "once" => Ok(RecurrenceKind::Once),
            "interval" => Ok(RecurrenceKind::Interval),
            "daily" => Ok(RecurrenceKind::Daily),
            "weekly" => Ok(RecurrenceKind::Weekly),
            "monthly" => Ok(RecurrenceKind::Monthly),
            other => Err(PingBoxError::InvalidSchedule(format!("unknown kind '{other}'"))),
        }
    }
}

/// How a reminder repeats. Each variant carries only its own parameters.
///
/// Weekdays count from Sunday = 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Recurrence {
    Once { at: DateTime<Utc> },
    Interval { minutes: u32 },
    Daily { minute_of_day: u16 },
    Weekly { weekday: u8, minute_of_day: u16 },
    Monthly { day: u8, minute_of_day: u16 },
}

impl Recurrence {
    pub fn kind(&self) -> RecurrenceKind {
        match self {
            Recurrence::Once { .. } => RecurrenceKind::Once,
            Recurrence::Interval { .. } => RecurrenceKind::Interval,
            Recurrence::Daily { .. } => RecurrenceKind::Daily,
            Recurrence::Weekly { .. } => RecurrenceKind::Weekly,
            Recurrence::Monthly { .. } => RecurrenceKind::Monthly,
        }
    }

    pub fn is_one_shot(&self) -> bool {
        matches!(self, Recurrence::Once { .. })
    }

    /// Local time of day for the calendar kinds.
    pub fn minute_of_day(&self) -> Option<u16> {
        match *self {
            Recurrence::Daily { minute_of_day }
            | Recurrence::Weekly { minute_of_day, .. }
            | Recurrence::Monthly { minute_of_day, .. } => Some(minute_of_day),
            Recurrence::Once { .. } | Recurrence::Interval { .. } => None,
        }
    }

    /// Same recurrence at a different time of day. No-op for once/interval.
    pub fn with_minute_of_day(self, minutes: u16) -> Self {
        match self {
            Recurrence::Daily { .. } => Recurrence::Daily { minute_of_day: minutes },
            Recurrence::Weekly { weekday, .. } => Recurrence::Weekly { weekday, minute_of_day: minutes },
            Recurrence::Monthly { day, .. } => Recurrence::Monthly { day, minute_of_day: minutes },
            other => other,
        }
    }

    /// Rebuild a recurrence from flat storage columns.
    ///
    /// Fails on an unknown kind, a missing parameter, or a value that does not
    /// fit its column type. Range checks beyond that belong to the scheduler.
    pub fn from_columns(
        kind: &str,
        interval_minutes: Option<i64>,
        minute_of_day: Option<i64>,
        weekday: Option<i64>,
        month_day: Option<i64>,
        at: Option<DateTime<Utc>>,
    ) -> Result<Self> {
        fn need<T: TryFrom<i64>>(v: Option<i64>, what: &str) -> Result<T> {
            let raw = v.ok_or_else(|| PingBoxError::InvalidSchedule(format!("missing {what}")))?;
            T::try_from(raw).map_err(|_| PingBoxError::InvalidSchedule(format!("{what} out of range: {raw}")))
        }

        Ok(match kind.parse::<RecurrenceKind>()? {
            RecurrenceKind::Once => Recurrence::Once {
                at: at.ok_or_else(|| PingBoxError::InvalidSchedule("missing fire time".into()))?,
            },
            RecurrenceKind::Interval => Recurrence::Interval {
                minutes: need(interval_minutes, "interval")?,
            },
            RecurrenceKind::Daily => Recurrence::Daily {
                minute_of_day: need(minute_of_day, "time of day")?,
            },
            RecurrenceKind::Weekly => Recurrence::Weekly {
                weekday: need(weekday, "weekday")?,
                minute_of_day: need(minute_of_day, "time of day")?,
            },
            RecurrenceKind::Monthly => Recurrence::Monthly {
                day: need(month_day, "day of month")?,
                minute_of_day: need(minute_of_day, "time of day")?,
            },
        })
    }
}

/// A user-defined, independently scheduled reminder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reminder {
    pub id: ReminderId,
    pub user_id: UserId,
    pub name: String,
    pub recurrence: Recurrence,
    /// Next instant the reminder should fire.
    pub next_run: DateTime<Utc>,
    pub last_run: Option<DateTime<Utc>>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

// ─── Text generation context ─────────────────────────────────────────────────

/// Coarse local time-of-day bucket passed to the generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeOfDay {
    Morning,
    Day,
    Evening,
    Night,
}

impl TimeOfDay {
    pub fn from_hour(hour: u32) -> Self {
        match hour {
            5..=11 => TimeOfDay::Morning,
            12..=17 => TimeOfDay::Day,
            18..=22 => TimeOfDay::Evening,
            _ => TimeOfDay::Night,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeOfDay::Morning => "morning",
            TimeOfDay::Day => "day",
            TimeOfDay::Evening => "evening",
            TimeOfDay::Night => "night",
        }
    }
}

/// Input for one generated message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationContext {
    pub entity_name: String,
    pub time_of_day: TimeOfDay,
    pub style: UserMode,
    pub random_seed: u32,
}
