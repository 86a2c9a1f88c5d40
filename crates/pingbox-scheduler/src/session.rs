//! Session cache: read-through per-user snapshots of users, items and reminders.
//!
//! Entries live in 16 shards keyed by user id, each behind its own `RwLock`.
//! Hits take a shard read lock; a miss takes the shard write lock for the
//! whole load so concurrent misses for the same user load once. Expiry is an
//! atomic deadline so a hit can refresh it without upgrading the lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use pingbox_core::error::Result;
use pingbox_core::types::{Item, Reminder, User, UserId};

const SHARDS: usize = 16;

/// Cached state for one user. `None` means "not loaded yet".
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub user: Option<User>,
    pub items: Option<Vec<Item>>,
    pub reminders: Option<Vec<Reminder>>,
    /// Authorized sessions never expire.
    pub authorized: bool,
}

struct Entry {
    session: Session,
    /// Unix millis; 0 = never.
    expires_at: AtomicU64,
}

impl Entry {
    fn is_expired(&self, now_ms: u64) -> bool {
        let deadline = self.expires_at.load(Ordering::Relaxed);
        deadline != 0 && now_ms > deadline
    }
}

type Shard = RwLock<HashMap<UserId, Entry>>;

pub struct SessionStore {
    shards: Vec<Shard>,
    ttl: Duration,
}

impl SessionStore {
    /// A zero `ttl` disables expiry.
    pub fn new(ttl: Duration) -> Self {
        Self {
            shards: (0..SHARDS).map(|_| RwLock::new(HashMap::new())).collect(),
            ttl,
        }
    }

    fn shard(&self, user_id: UserId) -> &Shard {
        &self.shards[(user_id.unsigned_abs() % SHARDS as u64) as usize]
    }

    fn read(&self, user_id: UserId) -> RwLockReadGuard<'_, HashMap<UserId, Entry>> {
        self.shard(user_id).read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self, user_id: UserId) -> RwLockWriteGuard<'_, HashMap<UserId, Entry>> {
        self.shard(user_id).write().unwrap_or_else(|e| e.into_inner())
    }

    fn deadline(&self, authorized: bool, now_ms: u64) -> u64 {
        if authorized || self.ttl.is_zero() {
            0
        } else {
            now_ms.saturating_add(self.ttl.as_millis() as u64)
        }
    }

    fn touch(&self, entry: &Entry, now_ms: u64) {
        entry
            .expires_at
            .store(self.deadline(entry.session.authorized, now_ms), Ordering::Relaxed);
    }

    /// Snapshot of a live session.
    pub fn get(&self, user_id: UserId) -> Option<Session> {
        let now = now_millis();
        let shard = self.read(user_id);
        let entry = shard.get(&user_id).filter(|e| !e.is_expired(now))?;
        self.touch(entry, now);
        Some(entry.session.clone())
    }

    fn get_or_load<T, R, W, L>(&self, user_id: UserId, read: R, write: W, load: L) -> Result<Option<T>>
    where
        T: Clone,
        R: Fn(&Session) -> Option<T>,
        W: FnOnce(&mut Session, T),
        L: FnOnce() -> Result<Option<T>>,
    {
        let now = now_millis();
        {
            let shard = self.read(user_id);
            if let Some(entry) = shard.get(&user_id).filter(|e| !e.is_expired(now)) {
                if let Some(value) = read(&entry.session) {
                    self.touch(entry, now);
                    tracing::debug!("Session cache hit for user {}", user_id);
                    return Ok(Some(value));
                }
            }
        }

        let mut shard = self.write(user_id);
        if let Some(entry) = shard.get(&user_id).filter(|e| !e.is_expired(now)) {
            if let Some(value) = read(&entry.session) {
                self.touch(entry, now);
                return Ok(Some(value));
            }
        }

        tracing::debug!("Session cache miss for user {}", user_id);
        let Some(value) = load()? else {
            return Ok(None);
        };

        let expired = shard.get(&user_id).is_some_and(|e| e.is_expired(now));
        if expired {
            shard.remove(&user_id);
        }
        let entry = shard.entry(user_id).or_insert_with(|| Entry {
            session: Session::default(),
            expires_at: AtomicU64::new(0),
        });
        write(&mut entry.session, value.clone());
        self.touch(entry, now);
        Ok(Some(value))
    }

    /// Cached user, loading it on a miss. A missing user is not cached.
    pub fn user_or_load<L>(&self, user_id: UserId, load: L) -> Result<Option<User>>
    where
        L: FnOnce() -> Result<Option<User>>,
    {
        self.get_or_load(user_id, |s| s.user.clone(), |s, u| s.user = Some(u), load)
    }

    pub fn items_or_load<L>(&self, user_id: UserId, load: L) -> Result<Vec<Item>>
    where
        L: FnOnce() -> Result<Vec<Item>>,
    {
        let items = self.get_or_load(
            user_id,
            |s| s.items.clone(),
            |s, items| s.items = Some(items),
            || load().map(Some),
        )?;
        Ok(items.unwrap_or_default())
    }

    pub fn reminders_or_load<L>(&self, user_id: UserId, load: L) -> Result<Vec<Reminder>>
    where
        L: FnOnce() -> Result<Vec<Reminder>>,
    {
        let reminders = self.get_or_load(
            user_id,
            |s| s.reminders.clone(),
            |s, list| s.reminders = Some(list),
            || load().map(Some),
        )?;
        Ok(reminders.unwrap_or_default())
    }

    /// Mutate a live session atomically. Returns false when none is cached.
    pub fn update<F>(&self, user_id: UserId, f: F) -> bool
    where
        F: FnOnce(&mut Session),
    {
        let now = now_millis();
        let mut shard = self.write(user_id);
        match shard.get_mut(&user_id) {
            Some(entry) if !entry.is_expired(now) => {
                f(&mut entry.session);
                self.touch(entry, now);
                true
            }
            _ => false,
        }
    }

    pub fn invalidate(&self, user_id: UserId) {
        self.write(user_id).remove(&user_id);
    }

    /// Pin a session so it never expires.
    pub fn mark_authorized(&self, user_id: UserId) {
        let mut shard = self.write(user_id);
        let entry = shard.entry(user_id).or_insert_with(|| Entry {
            session: Session::default(),
            expires_at: AtomicU64::new(0),
        });
        entry.session.authorized = true;
        entry.expires_at.store(0, Ordering::Relaxed);
    }

    /// Drop expired sessions. Returns how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        self.cleanup_expired_at(now_millis())
    }

    fn cleanup_expired_at(&self, now_ms: u64) -> usize {
        let mut removed = 0;
        for shard in &self.shards {
            let mut map = shard.write().unwrap_or_else(|e| e.into_inner());
            let before = map.len();
            map.retain(|_, entry| !entry.is_expired(now_ms));
            removed += before - map.len();
        }
        if removed > 0 {
            tracing::debug!("🧹 Expired {} session(s)", removed);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.read().unwrap_or_else(|e| e.into_inner()).len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run `cleanup_expired` every `every` until `cancel` fires.
    pub fn spawn_cleanup(self: Arc<Self>, every: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            if every.is_zero() {
                return;
            }
            let mut interval = tokio::time::interval(every);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        self.cleanup_expired();
                    }
                }
            }
            tracing::debug!("Session cleanup stopped");
        })
    }
}

fn now_millis() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}
