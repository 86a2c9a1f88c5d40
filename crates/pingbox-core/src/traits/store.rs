//! Repository traits: narrow read/write contracts over persisted records.
//!
//! Calls are synchronous: the backing store is an embedded database and each
//! call is short. Implementations must serialize conflicting writes.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{Item, ItemId, MessageLog, Reminder, ReminderId, User, UserId};

pub trait UserRepository: Send + Sync {
    /// Non-muted users whose next ambient notification is due (or never set).
    fn users_due_for_notification(&self, now: DateTime<Utc>) -> Result<Vec<User>>;

    fn find_user(&self, id: UserId) -> Result<Option<User>>;

    /// Insert or fully replace a user row.
    fn upsert_user(&self, user: &User) -> Result<()>;

    fn set_next_notification(&self, id: UserId, at: DateTime<Utc>) -> Result<()>;
}

pub trait ItemRepository: Send + Sync {
    fn items_for(&self, user_id: UserId) -> Result<Vec<Item>>;

    fn insert_item(&self, user_id: UserId, name: &str) -> Result<Item>;

    /// Returns false when no item had `old_name`.
    fn rename_item(&self, user_id: UserId, old_name: &str, new_name: &str) -> Result<bool>;

    /// Returns false when no item had `name`.
    fn delete_item(&self, user_id: UserId, name: &str) -> Result<bool>;
}

pub trait ReminderRepository: Send + Sync {
    /// Enabled reminders with `next_run <= now`, oldest first.
    fn reminders_due(&self, now: DateTime<Utc>) -> Result<Vec<Reminder>>;

    fn reminders_for(&self, user_id: UserId) -> Result<Vec<Reminder>>;

    fn find_reminder(&self, id: ReminderId) -> Result<Option<Reminder>>;

    /// Persist a new reminder; the returned copy carries the assigned id.
    fn insert_reminder(&self, reminder: &Reminder) -> Result<Reminder>;

    fn update_reminder(&self, reminder: &Reminder) -> Result<()>;

    fn set_next_run(&self, id: ReminderId, at: DateTime<Utc>) -> Result<()>;

    fn disable_reminder(&self, id: ReminderId) -> Result<()>;

    /// Returns false when the reminder did not exist.
    fn delete_reminder(&self, id: ReminderId) -> Result<bool>;
}

pub trait MessageLogRepository: Send + Sync {
    fn append_message_log(&self, entry: &MessageLog) -> Result<()>;

    /// Items mentioned to `user_id` at or after `since`.
    fn recent_item_ids(&self, user_id: UserId, since: DateTime<Utc>) -> Result<HashSet<ItemId>>;
}

/// Everything the workers and services need from storage.
pub trait Store: UserRepository + ItemRepository + ReminderRepository + MessageLogRepository {}

impl<T> Store for T where T: UserRepository + ItemRepository + ReminderRepository + MessageLogRepository {}
