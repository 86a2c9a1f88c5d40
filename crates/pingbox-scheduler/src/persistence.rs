//! SQLite-backed persistence for users, items, reminders and the message log.
//!
//! Instants are stored as fixed-width RFC 3339 UTC strings with millisecond
//! precision, so plain text comparison orders them.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};

use pingbox_core::error::{PingBoxError, Result};
use pingbox_core::traits::{ItemRepository, MessageLogRepository, ReminderRepository, UserRepository};
use pingbox_core::types::{
    Item, ItemId, MessageLog, Recurrence, Reminder, ReminderId, User, UserId, UserMode,
};

use crate::window::ActiveWindow;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY,
        mode TEXT NOT NULL DEFAULT 'cozy',
        timezone TEXT NOT NULL DEFAULT '',
        day_start INTEGER NOT NULL,
        day_end INTEGER NOT NULL,
        notification_preset TEXT,
        interval_min INTEGER NOT NULL DEFAULT 0,
        interval_max INTEGER NOT NULL DEFAULT 0,
        muted INTEGER NOT NULL DEFAULT 0,
        next_notification TEXT,
        created_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_users_next ON users(next_notification);

    CREATE TABLE IF NOT EXISTS items (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL,
        name TEXT NOT NULL,
        UNIQUE (user_id, name)
    );

    -- Exactly the columns relevant to `kind` are non-null.
    CREATE TABLE IF NOT EXISTS reminders (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL,
        name TEXT NOT NULL,
        kind TEXT NOT NULL,             -- once | interval | daily | weekly | monthly
        interval_minutes INTEGER,
        minute_of_day INTEGER,
        weekday INTEGER,                -- 0 = Sunday
        month_day INTEGER,
        once_at TEXT,
        next_run TEXT NOT NULL,
        last_run TEXT,
        enabled INTEGER NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL,
        UNIQUE (user_id, name)
    );
    CREATE INDEX IF NOT EXISTS idx_reminders_due ON reminders(enabled, next_run);

    CREATE TABLE IF NOT EXISTS message_log (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL,
        item_id INTEGER NOT NULL,
        sent_at TEXT NOT NULL,
        text TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_message_log_user ON message_log(user_id, sent_at);
";

const USER_COLUMNS: &str = "id, mode, timezone, day_start, day_end, notification_preset, \
     interval_min, interval_max, muted, next_notification, created_at";

const REMINDER_COLUMNS: &str = "id, user_id, name, kind, interval_minutes, minute_of_day, \
     weekday, month_day, once_at, next_run, last_run, enabled, created_at";

/// Single-connection SQLite store. Writes are serialized by the mutex.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database file and its tables.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).map_err(db_err)?;
        conn.busy_timeout(std::time::Duration::from_secs(5)).map_err(db_err)?;
        Self::init(conn)
    }

    /// Private in-memory database, used by tests and previews.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory().map_err(db_err)?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)
            .map_err(|e| PingBoxError::Storage(format!("Migration: {e}")))?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run raw SQL against the store, e.g. to plant a damaged row.
    #[cfg(test)]
    pub(crate) fn execute_sql(&self, sql: &str) -> Result<usize> {
        self.conn().execute(sql, []).map_err(db_err)
    }

    /// Full message history for a user, oldest first.
    pub fn message_log_for(&self, user_id: UserId) -> Result<Vec<MessageLog>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT user_id, item_id, sent_at, text FROM message_log
                 WHERE user_id = ?1 ORDER BY sent_at, id",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![user_id], |row| {
                Ok(MessageLog {
                    user_id: row.get(0)?,
                    item_id: row.get(1)?,
                    sent_at: parse_ts(row, 2)?,
                    text: row.get(3)?,
                })
            })
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    /// Rows that cannot be read are disabled in place and left out; they never
    /// fail the query for the other rows.
    fn query_reminders(&self, sql: &str, param: &dyn rusqlite::ToSql) -> Result<Vec<Reminder>> {
        let raw = {
            let conn = self.conn();
            let mut stmt = conn.prepare(sql).map_err(db_err)?;
            let rows = stmt
                .query_map([param], |row| Ok((row.get::<_, ReminderId>(0)?, ReminderRow::from_row(row))))
                .map_err(db_err)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)?
        };

        let mut reminders = Vec::with_capacity(raw.len());
        for (id, row) in raw {
            match row.and_then(ReminderRow::decode) {
                Ok(reminder) => reminders.push(reminder),
                Err(e) => {
                    tracing::warn!("⚠️ Reminder {} is unreadable ({e}); disabling", id);
                    if let Err(e) = self.disable_reminder(id) {
                        tracing::error!("❌ Failed to disable reminder {}: {e}", id);
                    }
                }
            }
        }
        Ok(reminders)
    }
}

impl UserRepository for SqliteStore {
    fn users_due_for_notification(&self, now: DateTime<Utc>) -> Result<Vec<User>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {USER_COLUMNS} FROM users
                 WHERE muted = 0 AND (next_notification IS NULL OR next_notification <= ?1)
                 ORDER BY next_notification"
            ))
            .map_err(db_err)?;
        let rows = stmt.query_map(params![ts(now)], user_from_row).map_err(db_err)?;

        let mut users = Vec::new();
        for row in rows {
            match row {
                Ok(user) => users.push(user),
                Err(e) => tracing::warn!("⚠️ Skipping unreadable user row: {e}"),
            }
        }
        Ok(users)
    }

    fn find_user(&self, id: UserId) -> Result<Option<User>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
            params![id],
            user_from_row,
        )
        .optional()
        .map_err(db_err)
    }

    fn upsert_user(&self, user: &User) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO users ({USER_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
            ),
            params![
                user.id,
                user.mode.as_str(),
                user.timezone,
                user.day_start,
                user.day_end,
                user.notification_preset,
                user.interval_min_minutes,
                user.interval_max_minutes,
                user.muted,
                user.next_notification.map(ts),
                ts(user.created_at),
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn set_next_notification(&self, id: UserId, at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn();
        let changed = conn
            .execute(
                "UPDATE users SET next_notification = ?1 WHERE id = ?2",
                params![ts(at), id],
            )
            .map_err(db_err)?;
        if changed == 0 {
            return Err(PingBoxError::NotFound(format!("user {id}")));
        }
        Ok(())
    }
}

impl ItemRepository for SqliteStore {
    fn items_for(&self, user_id: UserId) -> Result<Vec<Item>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT id, user_id, name FROM items WHERE user_id = ?1 ORDER BY id")
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![user_id], |row| {
                Ok(Item {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    name: row.get(2)?,
                })
            })
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    fn insert_item(&self, user_id: UserId, name: &str) -> Result<Item> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO items (user_id, name) VALUES (?1, ?2)",
            params![user_id, name],
        )
        .map_err(|e| unique_or_db(e, name))?;
        Ok(Item {
            id: conn.last_insert_rowid(),
            user_id,
            name: name.to_string(),
        })
    }

    fn rename_item(&self, user_id: UserId, old_name: &str, new_name: &str) -> Result<bool> {
        let conn = self.conn();
        let changed = conn
            .execute(
                "UPDATE items SET name = ?1 WHERE user_id = ?2 AND name = ?3",
                params![new_name, user_id, old_name],
            )
            .map_err(|e| unique_or_db(e, new_name))?;
        Ok(changed > 0)
    }

    fn delete_item(&self, user_id: UserId, name: &str) -> Result<bool> {
        let conn = self.conn();
        let changed = conn
            .execute(
                "DELETE FROM items WHERE user_id = ?1 AND name = ?2",
                params![user_id, name],
            )
            .map_err(db_err)?;
        Ok(changed > 0)
    }
}

impl ReminderRepository for SqliteStore {
    fn reminders_due(&self, now: DateTime<Utc>) -> Result<Vec<Reminder>> {
        self.query_reminders(
            &format!(
                "SELECT {REMINDER_COLUMNS} FROM reminders
                 WHERE enabled = 1 AND next_run <= ?1 ORDER BY next_run, id"
            ),
            &ts(now),
        )
    }

    fn reminders_for(&self, user_id: UserId) -> Result<Vec<Reminder>> {
        self.query_reminders(
            &format!("SELECT {REMINDER_COLUMNS} FROM reminders WHERE user_id = ?1 ORDER BY id"),
            &user_id,
        )
    }

    fn find_reminder(&self, id: ReminderId) -> Result<Option<Reminder>> {
        let row = {
            let conn = self.conn();
            conn.query_row(
                &format!("SELECT {REMINDER_COLUMNS} FROM reminders WHERE id = ?1"),
                params![id],
                |row| Ok(ReminderRow::from_row(row)),
            )
            .optional()
            .map_err(db_err)?
        };
        row.map(|r| r.and_then(ReminderRow::decode)).transpose()
    }

    fn insert_reminder(&self, reminder: &Reminder) -> Result<Reminder> {
        let cols = RecurrenceColumns::from(&reminder.recurrence);
        let conn = self.conn();
        conn.execute(
            "INSERT INTO reminders (user_id, name, kind, interval_minutes, minute_of_day,
                 weekday, month_day, once_at, next_run, last_run, enabled, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                reminder.user_id,
                reminder.name,
                reminder.recurrence.kind().as_str(),
                cols.interval_minutes,
                cols.minute_of_day,
                cols.weekday,
                cols.month_day,
                cols.once_at,
                ts(reminder.next_run),
                reminder.last_run.map(ts),
                reminder.enabled,
                ts(reminder.created_at),
            ],
        )
        .map_err(|e| unique_or_db(e, &reminder.name))?;
        Ok(Reminder {
            id: conn.last_insert_rowid(),
            ..reminder.clone()
        })
    }

    fn update_reminder(&self, reminder: &Reminder) -> Result<()> {
        let cols = RecurrenceColumns::from(&reminder.recurrence);
        let conn = self.conn();
        let changed = conn
            .execute(
                "UPDATE reminders SET name = ?1, kind = ?2, interval_minutes = ?3,
                     minute_of_day = ?4, weekday = ?5, month_day = ?6, once_at = ?7,
                     next_run = ?8, last_run = ?9, enabled = ?10
                 WHERE id = ?11",
                params![
                    reminder.name,
                    reminder.recurrence.kind().as_str(),
                    cols.interval_minutes,
                    cols.minute_of_day,
                    cols.weekday,
                    cols.month_day,
                    cols.once_at,
                    ts(reminder.next_run),
                    reminder.last_run.map(ts),
                    reminder.enabled,
                    reminder.id,
                ],
            )
            .map_err(|e| unique_or_db(e, &reminder.name))?;
        if changed == 0 {
            return Err(PingBoxError::NotFound(format!("reminder {}", reminder.id)));
        }
        Ok(())
    }

    fn set_next_run(&self, id: ReminderId, at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE reminders SET next_run = ?1 WHERE id = ?2",
            params![ts(at), id],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn disable_reminder(&self, id: ReminderId) -> Result<()> {
        let conn = self.conn();
        conn.execute("UPDATE reminders SET enabled = 0 WHERE id = ?1", params![id])
            .map_err(db_err)?;
        Ok(())
    }

    fn delete_reminder(&self, id: ReminderId) -> Result<bool> {
        let conn = self.conn();
        let changed = conn
            .execute("DELETE FROM reminders WHERE id = ?1", params![id])
            .map_err(db_err)?;
        Ok(changed > 0)
    }
}

impl MessageLogRepository for SqliteStore {
    fn append_message_log(&self, entry: &MessageLog) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO message_log (user_id, item_id, sent_at, text) VALUES (?1, ?2, ?3, ?4)",
            params![entry.user_id, entry.item_id, ts(entry.sent_at), entry.text],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn recent_item_ids(&self, user_id: UserId, since: DateTime<Utc>) -> Result<HashSet<ItemId>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT DISTINCT item_id FROM message_log WHERE user_id = ?1 AND sent_at >= ?2")
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![user_id, ts(since)], |row| row.get::<_, ItemId>(0))
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<HashSet<_>>>().map_err(db_err)
    }
}

// ─── Row mapping ─────────────────────────────────────────────────────────────

fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e)))
}

/// An instant column: `Ok(None)` for NULL, `Err` for anything unreadable.
fn read_ts(row: &Row<'_>, idx: usize) -> Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx).map_err(db_err)?;
    raw.map(|raw| {
        DateTime::parse_from_rfc3339(&raw)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| PingBoxError::Storage(format!("column {idx} holds '{raw}': {e}")))
    })
    .transpose()
}

fn require_ts(row: &Row<'_>, idx: usize) -> Result<DateTime<Utc>> {
    read_ts(row, idx)?.ok_or_else(|| PingBoxError::Storage(format!("column {idx} is NULL")))
}

/// Integer column, or `None` when NULL or not an integer.
fn lenient_int(row: &Row<'_>, idx: usize) -> Option<i64> {
    row.get::<_, Option<i64>>(idx).ok().flatten()
}

/// Only the id must be readable. Anything else that is malformed falls back:
/// the window to the default hours, the interval to the user's preset, and an
/// unreadable next notification to "never scheduled" so the worker re-arms it.
fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    let id: UserId = row.get(0)?;
    let text = |idx: usize| row.get::<_, Option<String>>(idx).ok().flatten();
    let window = ActiveWindow::normalized(lenient_int(row, 3).unwrap_or(-1), lenient_int(row, 4).unwrap_or(-1));
    let minutes = |idx: usize| lenient_int(row, idx).and_then(|v| u32::try_from(v).ok()).unwrap_or(0);

    let next_notification = read_ts(row, 9).unwrap_or_else(|e| {
        tracing::warn!("⚠️ User {} has an unreadable next notification ({e}); rescheduling", id);
        None
    });
    let created_at = require_ts(row, 10).unwrap_or_else(|e| {
        tracing::debug!("User {} has an unreadable creation time: {e}", id);
        Utc::now()
    });

    Ok(User {
        id,
        mode: UserMode::parse(&text(1).unwrap_or_default()),
        timezone: text(2).unwrap_or_default(),
        day_start: window.start,
        day_end: window.end,
        notification_preset: text(5),
        interval_min_minutes: minutes(6),
        interval_max_minutes: minutes(7),
        muted: lenient_int(row, 8).unwrap_or(0) != 0,
        next_notification,
        created_at,
    })
}

/// A reminder row before its schedule columns are interpreted.
struct ReminderRow {
    id: ReminderId,
    user_id: UserId,
    name: String,
    kind: String,
    interval_minutes: Option<i64>,
    minute_of_day: Option<i64>,
    weekday: Option<i64>,
    month_day: Option<i64>,
    once_at: Option<DateTime<Utc>>,
    next_run: DateTime<Utc>,
    last_run: Option<DateTime<Utc>>,
    enabled: bool,
    created_at: DateTime<Utc>,
}

impl ReminderRow {
    fn from_row(row: &Row<'_>) -> Result<Self> {
        Ok(Self {
            id: row.get(0).map_err(db_err)?,
            user_id: row.get(1).map_err(db_err)?,
            name: row.get(2).map_err(db_err)?,
            kind: row.get(3).map_err(db_err)?,
            interval_minutes: row.get(4).map_err(db_err)?,
            minute_of_day: row.get(5).map_err(db_err)?,
            weekday: row.get(6).map_err(db_err)?,
            month_day: row.get(7).map_err(db_err)?,
            once_at: read_ts(row, 8)?,
            next_run: require_ts(row, 9)?,
            last_run: read_ts(row, 10)?,
            enabled: row.get(11).map_err(db_err)?,
            created_at: require_ts(row, 12)?,
        })
    }

    fn decode(self) -> Result<Reminder> {
        let recurrence = Recurrence::from_columns(
            &self.kind,
            self.interval_minutes,
            self.minute_of_day,
            self.weekday,
            self.month_day,
            self.once_at,
        )?;
        Ok(Reminder {
            id: self.id,
            user_id: self.user_id,
            name: self.name,
            recurrence,
            next_run: self.next_run,
            last_run: self.last_run,
            enabled: self.enabled,
            created_at: self.created_at,
        })
    }
}

/// Flat column view of a recurrence; unused columns are NULL.
#[derive(Default)]
struct RecurrenceColumns {
    interval_minutes: Option<u32>,
    minute_of_day: Option<u16>,
    weekday: Option<u8>,
    month_day: Option<u8>,
    once_at: Option<String>,
}

impl From<&Recurrence> for RecurrenceColumns {
    fn from(recurrence: &Recurrence) -> Self {
        match *recurrence {
            Recurrence::Once { at } => Self { once_at: Some(ts(at)), ..Self::default() },
            Recurrence::Interval { minutes } => Self { interval_minutes: Some(minutes), ..Self::default() },
            Recurrence::Daily { minute_of_day } => Self { minute_of_day: Some(minute_of_day), ..Self::default() },
            Recurrence::Weekly { weekday, minute_of_day } => Self {
                weekday: Some(weekday),
                minute_of_day: Some(minute_of_day),
                ..Self::default()
            },
            Recurrence::Monthly { day, minute_of_day } => Self {
                month_day: Some(day),
                minute_of_day: Some(minute_of_day),
                ..Self::default()
            },
        }
    }
}

fn db_err(e: rusqlite::Error) -> PingBoxError {
    PingBoxError::Storage(e.to_string())
}

fn unique_or_db(e: rusqlite::Error, name: &str) -> PingBoxError {
    let violated = matches!(
        &e,
        rusqlite::Error::SqliteFailure(err, _) if err.code == rusqlite::ErrorCode::ConstraintViolation
    );
    if violated {
        PingBoxError::Duplicate(name.to_string())
    } else {
        db_err(e)
    }
}
