//! Services: validated user-facing operations over items, reminders and
//! user preferences.
//!
//! Every write goes to storage first and then into the session cache, so a
//! cached snapshot never shows state the database does not have.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use pingbox_core::config::UserDefaults;
use pingbox_core::error::{PingBoxError, Result, ValidationError};
use pingbox_core::traits::{ItemRepository, ReminderRepository, Store, UserRepository};
use pingbox_core::types::{
    Item, MINUTES_IN_DAY, NotificationPreset, Recurrence, Reminder, ReminderId, User, UserId,
    UserMode,
};

use crate::cadence::Cadence;
use crate::recurrence::compute_next;
use crate::session::SessionStore;
use crate::window::ActiveWindow;

pub const MAX_ITEMS_PER_USER: usize = 200;
pub const MAX_ITEM_NAME_CHARS: usize = 40;
pub const MAX_REMINDER_NAME_CHARS: usize = 64;

/// Trimmed, lower-cased, inner whitespace collapsed to single spaces.
pub fn normalize_item_name(raw: &str) -> std::result::Result<String, ValidationError> {
    let name = raw.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
    if name.is_empty() {
        return Err(ValidationError::EmptyName);
    }
    if name.chars().count() > MAX_ITEM_NAME_CHARS {
        return Err(ValidationError::NameTooLong(MAX_ITEM_NAME_CHARS));
    }
    Ok(name)
}

/// Trimmed; case is kept.
pub fn normalize_reminder_name(raw: &str) -> std::result::Result<String, ValidationError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(ValidationError::EmptyName);
    }
    if name.chars().count() > MAX_REMINDER_NAME_CHARS {
        return Err(ValidationError::NameTooLong(MAX_REMINDER_NAME_CHARS));
    }
    Ok(name.to_string())
}

/// Parameter ranges a stored recurrence must satisfy.
pub fn validate_recurrence(recurrence: &Recurrence) -> std::result::Result<(), ValidationError> {
    let time_ok = |m: u16| -> std::result::Result<(), ValidationError> {
        if m < MINUTES_IN_DAY {
            Ok(())
        } else {
            Err(ValidationError::InvalidTimeOfDay(i64::from(m)))
        }
    };
    match *recurrence {
        Recurrence::Once { .. } => Ok(()),
        Recurrence::Interval { minutes } => {
            if (1..=u32::from(MINUTES_IN_DAY)).contains(&minutes) {
                Ok(())
            } else {
                Err(ValidationError::InvalidInterval(i64::from(minutes)))
            }
        }
        Recurrence::Daily { minute_of_day } => time_ok(minute_of_day),
        Recurrence::Weekly { weekday, minute_of_day } => {
            if weekday > 6 {
                return Err(ValidationError::InvalidWeekday(i64::from(weekday)));
            }
            time_ok(minute_of_day)
        }
        Recurrence::Monthly { day, minute_of_day } => {
            if !(1..=31).contains(&day) {
                return Err(ValidationError::InvalidMonthDay(i64::from(day)));
            }
            time_ok(minute_of_day)
        }
    }
}

fn owner(store: &dyn Store, sessions: &SessionStore, user_id: UserId) -> Result<User> {
    sessions
        .user_or_load(user_id, || store.find_user(user_id))?
        .ok_or_else(|| PingBoxError::NotFound(format!("user {user_id}")))
}

// ─── Items ───────────────────────────────────────────────────────────────────

pub struct ItemService {
    store: Arc<dyn Store>,
    sessions: Arc<SessionStore>,
}

impl ItemService {
    pub fn new(store: Arc<dyn Store>, sessions: Arc<SessionStore>) -> Self {
        Self { store, sessions }
    }

    pub fn list(&self, user_id: UserId) -> Result<Vec<Item>> {
        self.sessions.items_or_load(user_id, || self.store.items_for(user_id))
    }

    pub fn create(&self, user_id: UserId, raw_name: &str) -> Result<Item> {
        let name = normalize_item_name(raw_name)?;
        let items = self.list(user_id)?;
        if items.len() >= MAX_ITEMS_PER_USER {
            return Err(PingBoxError::LimitReached(format!(
                "at most {MAX_ITEMS_PER_USER} items per user"
            )));
        }
        if items.iter().any(|i| i.name == name) {
            return Err(PingBoxError::Duplicate(name));
        }

        let item = self.store.insert_item(user_id, &name)?;
        self.sessions.update(user_id, |s| {
            if let Some(items) = s.items.as_mut() {
                items.push(item.clone());
            }
        });
        tracing::debug!("Item '{}' added for user {}", item.name, user_id);
        Ok(item)
    }

    /// Renaming to the same normalized name is a no-op.
    pub fn rename(&self, user_id: UserId, old_name: &str, new_name: &str) -> Result<()> {
        let old = normalize_item_name(old_name)?;
        let new = normalize_item_name(new_name)?;
        if old == new {
            return Ok(());
        }
        let items = self.list(user_id)?;
        if !items.iter().any(|i| i.name == old) {
            return Err(PingBoxError::NotFound(format!("item '{old}'")));
        }
        if items.iter().any(|i| i.name == new) {
            return Err(PingBoxError::Duplicate(new));
        }

        if !self.store.rename_item(user_id, &old, &new)? {
            self.sessions.update(user_id, |s| s.items = None);
            return Err(PingBoxError::NotFound(format!("item '{old}'")));
        }
        self.sessions.update(user_id, |s| {
            if let Some(item) = s.items.as_mut().and_then(|items| items.iter_mut().find(|i| i.name == old)) {
                item.name = new.clone();
            }
        });
        Ok(())
    }

    pub fn delete(&self, user_id: UserId, raw_name: &str) -> Result<()> {
        let name = normalize_item_name(raw_name)?;
        if !self.store.delete_item(user_id, &name)? {
            return Err(PingBoxError::NotFound(format!("item '{name}'")));
        }
        self.sessions.update(user_id, |s| {
            if let Some(items) = s.items.as_mut() {
                items.retain(|i| i.name != name);
            }
        });
        Ok(())
    }
}

// ─── Reminders ───────────────────────────────────────────────────────────────

pub struct ReminderService {
    store: Arc<dyn Store>,
    sessions: Arc<SessionStore>,
    cadence: Cadence,
}

impl ReminderService {
    pub fn new(store: Arc<dyn Store>, sessions: Arc<SessionStore>, cadence: Cadence) -> Self {
        Self { store, sessions, cadence }
    }

    pub fn list(&self, user_id: UserId) -> Result<Vec<Reminder>> {
        self.sessions.reminders_or_load(user_id, || self.store.reminders_for(user_id))
    }

    pub fn create_once(&self, user_id: UserId, name: &str, at: DateTime<Utc>) -> Result<Reminder> {
        self.create(user_id, name, Recurrence::Once { at }, Utc::now())
    }

    pub fn create_interval(&self, user_id: UserId, name: &str, minutes: i64, now: DateTime<Utc>) -> Result<Reminder> {
        let minutes = u32::try_from(minutes).map_err(|_| ValidationError::InvalidInterval(minutes))?;
        self.create(user_id, name, Recurrence::Interval { minutes }, now)
    }

    pub fn create_daily(&self, user_id: UserId, name: &str, minute_of_day: i64, now: DateTime<Utc>) -> Result<Reminder> {
        let minute_of_day = time_of_day(minute_of_day)?;
        self.create(user_id, name, Recurrence::Daily { minute_of_day }, now)
    }

    pub fn create_weekly(
        &self,
        user_id: UserId,
        name: &str,
        weekday: i64,
        minute_of_day: i64,
        now: DateTime<Utc>,
    ) -> Result<Reminder> {
        let weekday = u8::try_from(weekday).map_err(|_| ValidationError::InvalidWeekday(weekday))?;
        let minute_of_day = time_of_day(minute_of_day)?;
        self.create(user_id, name, Recurrence::Weekly { weekday, minute_of_day }, now)
    }

    pub fn create_monthly(
        &self,
        user_id: UserId,
        name: &str,
        day: i64,
        minute_of_day: i64,
        now: DateTime<Utc>,
    ) -> Result<Reminder> {
        let day = u8::try_from(day).map_err(|_| ValidationError::InvalidMonthDay(day))?;
        let minute_of_day = time_of_day(minute_of_day)?;
        self.create(user_id, name, Recurrence::Monthly { day, minute_of_day }, now)
    }

    /// Validate, compute the first run in the owner's timezone and persist.
    pub fn create(&self, user_id: UserId, raw_name: &str, recurrence: Recurrence, now: DateTime<Utc>) -> Result<Reminder> {
        let name = normalize_reminder_name(raw_name)?;
        validate_recurrence(&recurrence)?;
        let user = owner(self.store.as_ref(), &self.sessions, user_id)?;

        let existing = self.list(user_id)?;
        if existing.iter().any(|r| r.name.eq_ignore_ascii_case(&name)) {
            return Err(PingBoxError::Duplicate(name));
        }

        let tz = self.cadence.timezone_for(&user);
        let next_run = compute_next(&recurrence, now, &tz)
            .ok_or_else(|| PingBoxError::InvalidSchedule(format!("no next run for '{name}'")))?;

        let draft = Reminder {
            id: 0,
            user_id,
            name,
            recurrence,
            next_run,
            last_run: None,
            enabled: true,
            created_at: now,
        };
        let reminder = self.store.insert_reminder(&draft)?;
        self.sessions.update(user_id, |s| {
            if let Some(list) = s.reminders.as_mut() {
                list.push(reminder.clone());
            }
        });
        tracing::info!(
            "⏰ Reminder {} '{}' created for user {}; first run {}",
            reminder.id,
            reminder.name,
            user_id,
            reminder.next_run
        );
        Ok(reminder)
    }

    /// Re-enable with a freshly computed next run, or `now + fallback` when
    /// the schedule cannot be computed. Already enabled reminders are returned
    /// unchanged.
    pub fn enable(&self, user_id: UserId, id: ReminderId, now: DateTime<Utc>) -> Result<Reminder> {
        let mut reminder = self.owned(user_id, id)?;
        if reminder.enabled {
            return Ok(reminder);
        }
        let user = owner(self.store.as_ref(), &self.sessions, user_id)?;
        let tz = self.cadence.timezone_for(&user);
        reminder.next_run = compute_next(&reminder.recurrence, now, &tz).unwrap_or_else(|| {
            tracing::warn!("⚠️ Reminder {} has no computable next run; using fallback delay", id);
            now + self.cadence.reenable_fallback
        });
        reminder.enabled = true;
        self.save(&reminder)?;
        Ok(reminder)
    }

    pub fn disable(&self, user_id: UserId, id: ReminderId) -> Result<Reminder> {
        let mut reminder = self.owned(user_id, id)?;
        if !reminder.enabled {
            return Ok(reminder);
        }
        reminder.enabled = false;
        self.save(&reminder)?;
        Ok(reminder)
    }

    pub fn delete(&self, user_id: UserId, id: ReminderId) -> Result<()> {
        self.owned(user_id, id)?;
        if !self.store.delete_reminder(id)? {
            return Err(PingBoxError::NotFound(format!("reminder {id}")));
        }
        self.sessions.update(user_id, |s| {
            if let Some(list) = s.reminders.as_mut() {
                list.retain(|r| r.id != id);
            }
        });
        Ok(())
    }

    /// Move every time-of-day reminder that lies outside the user's window to
    /// the nearer boundary and recompute its next run. Returns how many moved.
    pub fn clamp_to_window(&self, user: &User, now: DateTime<Utc>) -> Result<usize> {
        self.realign(user, now, false)
    }

    /// Recompute every enabled calendar reminder after a timezone change,
    /// clamping into the window on the way.
    pub fn follow_timezone(&self, user: &User, now: DateTime<Utc>) -> Result<usize> {
        self.realign(user, now, true)
    }

    fn realign(&self, user: &User, now: DateTime<Utc>, recompute_all: bool) -> Result<usize> {
        let window = ActiveWindow::for_user(user);
        let tz = self.cadence.timezone_for(user);
        let mut moved = 0;
        for mut reminder in self.list(user.id)? {
            let Some(minute) = reminder.recurrence.minute_of_day() else {
                continue;
            };
            let (clamped, was_clamped) = window.clamp(minute);
            if !was_clamped && !recompute_all {
                continue;
            }
            if was_clamped {
                let clamped = clamped.min(MINUTES_IN_DAY - 1);
                reminder.recurrence = reminder.recurrence.with_minute_of_day(clamped);
                moved += 1;
                tracing::debug!(
                    "Reminder {} moved from {} to {} to fit the active window",
                    reminder.id,
                    minute,
                    clamped
                );
            }
            if reminder.enabled {
                if let Some(next) = compute_next(&reminder.recurrence, now, &tz) {
                    reminder.next_run = next;
                }
            }
            self.save(&reminder)?;
        }
        Ok(moved)
    }

    fn owned(&self, user_id: UserId, id: ReminderId) -> Result<Reminder> {
        match self.store.find_reminder(id)? {
            Some(r) if r.user_id == user_id => Ok(r),
            _ => Err(PingBoxError::NotFound(format!("reminder {id}"))),
        }
    }

    fn save(&self, reminder: &Reminder) -> Result<()> {
        self.store.update_reminder(reminder)?;
        self.sessions.update(reminder.user_id, |s| {
            if let Some(cached) = s.reminders.as_mut().and_then(|l| l.iter_mut().find(|r| r.id == reminder.id)) {
                *cached = reminder.clone();
            }
        });
        Ok(())
    }
}

fn time_of_day(raw: i64) -> std::result::Result<u16, ValidationError> {
    u16::try_from(raw)
        .ok()
        .filter(|m| *m < MINUTES_IN_DAY)
        .ok_or(ValidationError::InvalidTimeOfDay(raw))
}

// ─── Users ───────────────────────────────────────────────────────────────────

pub struct UserService {
    store: Arc<dyn Store>,
    sessions: Arc<SessionStore>,
    cadence: Cadence,
    defaults: UserDefaults,
    reminders: ReminderService,
}

impl UserService {
    pub fn new(store: Arc<dyn Store>, sessions: Arc<SessionStore>, cadence: Cadence, defaults: UserDefaults) -> Self {
        let reminders = ReminderService::new(store.clone(), sessions.clone(), cadence.clone());
        Self { store, sessions, cadence, defaults, reminders }
    }

    pub fn get(&self, user_id: UserId) -> Result<Option<User>> {
        self.sessions.user_or_load(user_id, || self.store.find_user(user_id))
    }

    /// Create the user with default preferences and a first notification
    /// time. An existing user is returned as is. Either way the user's
    /// session is pinned in the cache.
    pub fn activate(&self, user_id: UserId, now: DateTime<Utc>) -> Result<User> {
        if let Some(user) = self.get(user_id)? {
            self.sessions.mark_authorized(user_id);
            return Ok(user);
        }
        let window = ActiveWindow::normalized(i64::from(self.defaults.day_start), i64::from(self.defaults.day_end));
        let mut user = User::new(user_id, &self.defaults.timezone, window.start, window.end, &self.defaults.preset);
        user.created_at = now;
        user.next_notification = Some(self.cadence.next_notification(&user, now));
        self.store.upsert_user(&user)?;
        self.cache(&user)?;
        self.sessions.mark_authorized(user_id);
        tracing::info!("👋 User {} activated; first notification {:?}", user_id, user.next_notification);
        Ok(user)
    }

    pub fn set_mode(&self, user_id: UserId, mode: UserMode) -> Result<User> {
        self.modify(user_id, Utc::now(), |user| {
            user.mode = mode;
            Ok(false)
        })
    }

    pub fn set_preset(&self, user_id: UserId, key: &str, now: DateTime<Utc>) -> Result<User> {
        let preset = NotificationPreset::find(key)
            .ok_or_else(|| PingBoxError::NotFound(format!("notification preset '{}'", key.trim())))?;
        self.modify(user_id, now, |user| {
            user.notification_preset = Some(preset.key.to_string());
            user.interval_min_minutes = preset.min_minutes;
            user.interval_max_minutes = preset.max_minutes;
            Ok(true)
        })
    }

    /// Explicit range in minutes; clears any preset.
    pub fn set_custom_range(&self, user_id: UserId, min: i64, max: i64, now: DateTime<Utc>) -> Result<User> {
        let day = i64::from(MINUTES_IN_DAY);
        if min <= 0 || max < min || max > day {
            return Err(ValidationError::InvalidRange(min, max).into());
        }
        self.modify(user_id, now, |user| {
            user.notification_preset = None;
            user.interval_min_minutes = min as u32;
            user.interval_max_minutes = max as u32;
            Ok(true)
        })
    }

    pub fn mute(&self, user_id: UserId) -> Result<User> {
        self.modify(user_id, Utc::now(), |user| {
            user.muted = true;
            user.next_notification = None;
            Ok(false)
        })
    }

    pub fn unmute(&self, user_id: UserId, now: DateTime<Utc>) -> Result<User> {
        self.modify(user_id, now, |user| {
            user.muted = false;
            Ok(true)
        })
    }

    /// Change the active window, then clamp time-of-day reminders into it.
    pub fn set_window(&self, user_id: UserId, start: i64, end: i64, now: DateTime<Utc>) -> Result<User> {
        if !ActiveWindow::is_valid(start, end) {
            return Err(ValidationError::InvalidWindow(start, end).into());
        }
        let user = self.modify(user_id, now, |user| {
            user.day_start = start as u16;
            user.day_end = end as u16;
            Ok(true)
        })?;
        let moved = self.reminders.clamp_to_window(&user, now)?;
        if moved > 0 {
            tracing::info!("🕰️ Clamped {} reminder(s) of user {} into the new window", moved, user_id);
        }
        Ok(user)
    }

    pub fn set_timezone(&self, user_id: UserId, name: &str, now: DateTime<Utc>) -> Result<User> {
        let name = name.trim();
        if name.parse::<Tz>().is_err() {
            return Err(ValidationError::UnknownTimezone(name.to_string()).into());
        }
        let user = self.modify(user_id, now, |user| {
            user.timezone = name.to_string();
            Ok(true)
        })?;
        self.reminders.follow_timezone(&user, now)?;
        Ok(user)
    }

    /// Apply `change` to the stored user. When it returns true and the user is
    /// not muted, the next ambient notification is drawn again.
    fn modify<F>(&self, user_id: UserId, now: DateTime<Utc>, change: F) -> Result<User>
    where
        F: FnOnce(&mut User) -> Result<bool>,
    {
        let mut user = owner(self.store.as_ref(), &self.sessions, user_id)?;
        let reschedule = change(&mut user)?;
        if reschedule && !user.muted {
            user.next_notification = Some(self.cadence.next_notification(&user, now));
        }
        self.store.upsert_user(&user)?;
        self.cache(&user)?;
        Ok(user)
    }

    fn cache(&self, user: &User) -> Result<()> {
        let updated = self.sessions.update(user.id, |s| s.user = Some(user.clone()));
        if !updated {
            self.sessions.user_or_load(user.id, || Ok(Some(user.clone())))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::SqliteStore;
    use chrono::{Duration, TimeZone};

    struct Fixture {
        store: Arc<SqliteStore>,
        sessions: Arc<SessionStore>,
        items: ItemService,
        reminders: ReminderService,
        users: UserService,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let sessions = Arc::new(SessionStore::new(std::time::Duration::ZERO));
        let cadence = Cadence::default();
        Fixture {
            items: ItemService::new(store.clone(), sessions.clone()),
            reminders: ReminderService::new(store.clone(), sessions.clone(), cadence.clone()),
            users: UserService::new(store.clone(), sessions.clone(), cadence, UserDefaults::default()),
            store,
            sessions,
        }
    }

    fn msk(d: u32, h: u32, m: u32) -> DateTime<Utc> {
        let tz: Tz = "Europe/Moscow".parse().unwrap();
        tz.with_ymd_and_hms(2026, 3, d, h, m, 0).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_item_name_normalization() {
        assert_eq!(normalize_item_name("  Green   TEA ").unwrap(), "green tea");
        assert_eq!(normalize_item_name(" \t "), Err(ValidationError::EmptyName));
        assert_eq!(normalize_item_name(&"x".repeat(41)), Err(ValidationError::NameTooLong(40)));
        assert!(normalize_item_name(&"я".repeat(40)).is_ok());
    }

    #[test]
    fn test_item_create_rename_delete() {
        let f = fixture();
        let tea = f.items.create(1, "Tea").unwrap();
        assert_eq!(tea.name, "tea");
        assert!(matches!(f.items.create(1, " TEA "), Err(PingBoxError::Duplicate(_))));

        f.items.create(1, "coffee").unwrap();
        f.items.rename(1, "tea", "Green Tea").unwrap();
        f.items.rename(1, "green tea", "GREEN  tea").unwrap();
        assert!(matches!(f.items.rename(1, "green tea", "coffee"), Err(PingBoxError::Duplicate(_))));
        assert!(matches!(f.items.rename(1, "juice", "water"), Err(PingBoxError::NotFound(_))));

        f.items.delete(1, "coffee").unwrap();
        assert!(matches!(f.items.delete(1, "coffee"), Err(PingBoxError::NotFound(_))));

        let names: Vec<String> = f.items.list(1).unwrap().into_iter().map(|i| i.name).collect();
        assert_eq!(names, vec!["green tea"]);
        // Cache and storage agree.
        let stored: Vec<String> = f.store.items_for(1).unwrap().into_iter().map(|i| i.name).collect();
        assert_eq!(stored, names);
    }

    #[test]
    fn test_item_limit() {
        let f = fixture();
        for i in 0..MAX_ITEMS_PER_USER {
            f.items.create(1, &format!("item {i}")).unwrap();
        }
        assert!(matches!(f.items.create(1, "one more"), Err(PingBoxError::LimitReached(_))));
        // Other users are unaffected.
        assert!(f.items.create(2, "one more").is_ok());
    }

    #[test]
    fn test_reminder_validation() {
        let f = fixture();
        let now = msk(10, 15, 0);
        f.users.activate(1, now).unwrap();

        let err = f.reminders.create_interval(1, "water", 0, now).unwrap_err();
        assert!(matches!(err, PingBoxError::Validation(ValidationError::InvalidInterval(0))));
        assert!(f.reminders.create_interval(1, "water", 1441, now).is_err());
        assert!(f.reminders.create_daily(1, "pills", 1440, now).is_err());
        assert!(f.reminders.create_daily(1, "pills", -1, now).is_err());
        assert!(f.reminders.create_weekly(1, "gym", 7, 600, now).is_err());
        assert!(f.reminders.create_monthly(1, "rent", 0, 600, now).is_err());
        assert!(f.reminders.create_monthly(1, "rent", 32, 600, now).is_err());
        assert!(matches!(
            f.reminders.create_daily(1, "   ", 600, now),
            Err(PingBoxError::Validation(ValidationError::EmptyName))
        ));
        assert!(f.reminders.create_daily(1, &"n".repeat(65), 600, now).is_err());
        assert!(f.reminders.list(1).unwrap().is_empty());
    }

    #[test]
    fn test_reminder_create_computes_next_run() {
        let f = fixture();
        let now = msk(10, 15, 0); // Tuesday
        f.users.activate(1, now).unwrap();

        let daily = f.reminders.create_daily(1, "pills", 14 * 60, now).unwrap();
        assert_eq!(daily.next_run, msk(11, 14, 0));

        let weekly = f.reminders.create_weekly(1, "gym", 1, 9 * 60, now).unwrap();
        assert_eq!(weekly.next_run, msk(16, 9, 0));

        let interval = f.reminders.create_interval(1, "water", 45, now).unwrap();
        assert_eq!(interval.next_run, now + Duration::minutes(45));

        assert!(matches!(
            f.reminders.create_daily(1, "PILLS", 600, now),
            Err(PingBoxError::Duplicate(_))
        ));
        assert!(matches!(
            f.reminders.create_daily(99, "pills", 600, now),
            Err(PingBoxError::NotFound(_))
        ));

        let listed = f.reminders.list(1).unwrap();
        assert_eq!(listed.len(), 3);
        assert_eq!(f.store.reminders_for(1).unwrap().len(), 3);
    }

    #[test]
    fn test_reminder_disable_enable_delete() {
        let f = fixture();
        let now = msk(10, 15, 0);
        f.users.activate(1, now).unwrap();
        f.users.activate(2, now).unwrap();
        let r = f.reminders.create_daily(1, "pills", 9 * 60, now).unwrap();

        assert!(matches!(f.reminders.disable(2, r.id), Err(PingBoxError::NotFound(_))));
        let disabled = f.reminders.disable(1, r.id).unwrap();
        assert!(!disabled.enabled);
        assert!(f.store.reminders_due(msk(20, 9, 0)).unwrap().is_empty());

        let later = msk(12, 10, 0);
        let enabled = f.reminders.enable(1, r.id, later).unwrap();
        assert!(enabled.enabled);
        assert_eq!(enabled.next_run, msk(13, 9, 0));
        assert!(f.sessions.get(1).unwrap().reminders.unwrap()[0].enabled);

        f.reminders.delete(1, r.id).unwrap();
        assert!(matches!(f.reminders.delete(1, r.id), Err(PingBoxError::NotFound(_))));
        assert!(f.reminders.list(1).unwrap().is_empty());
    }

    #[test]
    fn test_enable_falls_back_when_schedule_is_unusable() {
        let f = fixture();
        let now = msk(10, 15, 0);
        f.users.activate(1, now).unwrap();
        let mut r = f.reminders.create_interval(1, "water", 30, now).unwrap();
        // A row corrupted to a zero interval.
        r.recurrence = Recurrence::Interval { minutes: 0 };
        r.enabled = false;
        f.store.update_reminder(&r).unwrap();

        let enabled = f.reminders.enable(1, r.id, now).unwrap();
        assert_eq!(enabled.next_run, now + Duration::minutes(60));
    }

    #[test]
    fn test_activate_defaults_and_idempotence() {
        let f = fixture();
        let now = msk(10, 15, 0);
        let user = f.users.activate(7, now).unwrap();
        assert_eq!(user.timezone, "Europe/Moscow");
        assert_eq!((user.day_start, user.day_end), (720, 1320));
        assert_eq!(user.notification_preset.as_deref(), Some("normal"));
        let next = user.next_notification.unwrap();
        assert!(next >= now + Duration::minutes(60) && next <= now + Duration::minutes(120));

        let again = f.users.activate(7, now + Duration::hours(1)).unwrap();
        assert_eq!(again.next_notification, user.next_notification);
        assert_eq!(f.store.find_user(7).unwrap().unwrap().id, 7);
        assert!(f.sessions.get(7).unwrap().authorized);
    }

    #[test]
    fn test_activated_session_outlives_ttl() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let sessions = Arc::new(SessionStore::new(std::time::Duration::from_millis(20)));
        let users = UserService::new(store, sessions.clone(), Cadence::default(), UserDefaults::default());
        users.activate(8, msk(10, 15, 0)).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(50));
        assert_eq!(sessions.cleanup_expired(), 0);
        assert!(sessions.get(8).unwrap().user.is_some());
    }

    #[test]
    fn test_preset_and_custom_range() {
        let f = fixture();
        let now = msk(10, 13, 0);
        f.users.activate(1, now).unwrap();

        let user = f.users.set_preset(1, "rare", now).unwrap();
        assert_eq!(user.notification_range(), (120, 240));
        assert!(user.next_notification.unwrap() >= now + Duration::minutes(120));
        assert!(matches!(f.users.set_preset(1, "sometimes", now), Err(PingBoxError::NotFound(_))));

        let user = f.users.set_custom_range(1, 15, 30, now).unwrap();
        assert_eq!(user.notification_preset, None);
        assert_eq!(user.notification_range(), (15, 30));
        assert!(f.users.set_custom_range(1, 30, 15, now).is_err());
        assert!(f.users.set_custom_range(1, 0, 15, now).is_err());

        let stored = f.store.find_user(1).unwrap().unwrap();
        assert_eq!(stored.notification_range(), (15, 30));
    }

    #[test]
    fn test_mute_and_unmute() {
        let f = fixture();
        let now = msk(10, 13, 0);
        f.users.activate(1, now).unwrap();

        let muted = f.users.mute(1).unwrap();
        assert!(muted.muted);
        assert_eq!(muted.next_notification, None);
        assert!(f.store.users_due_for_notification(now + Duration::days(1)).unwrap().is_empty());
        assert!(f.sessions.get(1).unwrap().user.unwrap().muted);

        let unmuted = f.users.unmute(1, now).unwrap();
        assert!(!unmuted.muted);
        assert!(unmuted.next_notification.unwrap() > now);
    }

    #[test]
    fn test_set_window_clamps_reminders() {
        let f = fixture();
        let now = msk(10, 13, 0);
        f.users.activate(1, now).unwrap();
        let early = f.reminders.create_daily(1, "pills", 9 * 60, now).unwrap();
        let inside = f.reminders.create_daily(1, "tea", 15 * 60, now).unwrap();

        assert!(matches!(
            f.users.set_window(1, 600, 600, now),
            Err(PingBoxError::Validation(ValidationError::InvalidWindow(600, 600)))
        ));

        let user = f.users.set_window(1, 10 * 60, 20 * 60, now).unwrap();
        assert_eq!((user.day_start, user.day_end), (600, 1200));

        let early = f.store.find_reminder(early.id).unwrap().unwrap();
        assert_eq!(early.recurrence, Recurrence::Daily { minute_of_day: 600 });
        assert_eq!(early.next_run, msk(11, 10, 0));
        let inside = f.store.find_reminder(inside.id).unwrap().unwrap();
        assert_eq!(inside.recurrence, Recurrence::Daily { minute_of_day: 900 });
    }

    #[test]
    fn test_set_timezone() {
        let f = fixture();
        let now = msk(10, 13, 0);
        f.users.activate(1, now).unwrap();
        let r = f.reminders.create_daily(1, "pills", 14 * 60, now).unwrap();
        assert_eq!(r.next_run, msk(10, 14, 0));

        assert!(matches!(
            f.users.set_timezone(1, "Mars/Olympus", now),
            Err(PingBoxError::Validation(ValidationError::UnknownTimezone(_)))
        ));

        let user = f.users.set_timezone(1, " UTC ", now).unwrap();
        assert_eq!(user.timezone, "UTC");
        // 13:00 MSK is 10:00 UTC; 14:00 UTC today.
        let moved = f.store.find_reminder(r.id).unwrap().unwrap();
        assert_eq!(moved.next_run, Utc.with_ymd_and_hms(2026, 3, 10, 14, 0, 0).unwrap());
    }
}
