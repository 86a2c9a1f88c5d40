//! Item notification worker: ambient nudges about a user's items.
//!
//! Each tick loads the users whose next notification is due and handles them
//! independently: stale cycles and out-of-window times are rescheduled without
//! sending; otherwise one item is picked (avoiding recently mentioned ones),
//! text is generated or synthesized, sent, logged, and the next time drawn.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::{FutureExt, StreamExt};
use rand::seq::SliceRandom;

use pingbox_core::traits::{
    ItemRepository, MessageLogRepository, Store, TextGenerator, Transport, UserRepository,
};
use pingbox_core::types::{Item, ItemId, MessageLog, User, UserId};

use crate::cadence::{Cadence, deliver, generation_context, text_or_fallback};
use crate::session::SessionStore;
use crate::{TickStats, panic_message};

/// What happened to one due user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyOutcome {
    Muted,
    /// Missed cycle; rescheduled without sending.
    Overdue,
    OutsideWindow,
    NoItems,
    /// Items could not be loaded; retry soon.
    ItemsUnavailable,
    SendFailed,
    Sent { item_id: ItemId },
}

pub struct ItemNotifier {
    store: Arc<dyn Store>,
    sessions: Arc<SessionStore>,
    generator: Option<Arc<dyn TextGenerator>>,
    transport: Arc<dyn Transport>,
    cadence: Cadence,
    max_concurrency: usize,
}

impl ItemNotifier {
    pub fn new(
        store: Arc<dyn Store>,
        sessions: Arc<SessionStore>,
        generator: Option<Arc<dyn TextGenerator>>,
        transport: Arc<dyn Transport>,
        cadence: Cadence,
        max_concurrency: usize,
    ) -> Self {
        Self {
            store,
            sessions,
            generator,
            transport,
            cadence,
            max_concurrency: max_concurrency.max(1),
        }
    }

    pub async fn tick(&self) -> TickStats {
        self.tick_at(Utc::now()).await
    }

    /// One pass over every user due at `now`.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> TickStats {
        let users = match self.store.users_due_for_notification(now) {
            Ok(users) => users,
            Err(e) => {
                tracing::error!("❌ Failed to load users due for notification: {e}");
                return TickStats::default();
            }
        };
        tracing::debug!("Notification tick: {} user(s) due at {}", users.len(), now);

        let outcomes: Vec<Option<NotifyOutcome>> = futures::stream::iter(users)
            .map(|user| {
                let user_id = user.id;
                async move {
                    match AssertUnwindSafe(self.process_user(user, now)).catch_unwind().await {
                        Ok(outcome) => Some(outcome),
                        Err(payload) => {
                            tracing::error!(
                                "💥 Notification for user {} panicked: {}",
                                user_id,
                                panic_message(&*payload)
                            );
                            None
                        }
                    }
                }
            })
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;

        let mut stats = TickStats { due: outcomes.len(), ..TickStats::default() };
        for outcome in outcomes {
            match outcome {
                Some(NotifyOutcome::Sent { .. }) => stats.sent += 1,
                Some(NotifyOutcome::SendFailed) => stats.failed += 1,
                Some(_) => stats.deferred += 1,
                None => stats.panicked += 1,
            }
        }
        stats
    }

    async fn process_user(&self, user: User, now: DateTime<Utc>) -> NotifyOutcome {
        if user.muted {
            return NotifyOutcome::Muted;
        }

        if self.cadence.is_overdue(&user, now) {
            let next = self.cadence.next_notification(&user, now);
            tracing::debug!("User {} overdue; reschedule to {}", user.id, next);
            self.reschedule(user.id, next);
            return NotifyOutcome::Overdue;
        }

        if !self.cadence.in_window(&user, now) {
            let next = self.cadence.next_window_start(&user, now);
            tracing::debug!("User {} outside active hours; next start {}", user.id, next);
            self.reschedule(user.id, next);
            return NotifyOutcome::OutsideWindow;
        }

        let items = match self.sessions.items_or_load(user.id, || self.store.items_for(user.id)) {
            Ok(items) => items,
            Err(e) => {
                tracing::error!("❌ Failed to load items for user {}: {e}", user.id);
                self.reschedule(user.id, self.cadence.retry_at(now));
                return NotifyOutcome::ItemsUnavailable;
            }
        };
        let Some(item) = self.pick_item(user.id, &items, now) else {
            let next = self.cadence.next_notification(&user, now);
            tracing::debug!("User {} has no items; reschedule to {}", user.id, next);
            self.reschedule(user.id, next);
            return NotifyOutcome::NoItems;
        };
        tracing::debug!("User {} selected item {} '{}'", user.id, item.id, item.name);

        let local_now = now.with_timezone(&self.cadence.timezone_for(&user));
        let context = generation_context(&item.name, &local_now, user.mode);
        let text = text_or_fallback(self.generator.as_ref(), &context, self.cadence.generate_timeout).await;

        if let Err(e) = deliver(self.transport.as_ref(), user.id, &text, self.cadence.send_timeout).await {
            tracing::warn!("⚠️ Notification to user {} failed: {e}", user.id);
            self.reschedule(user.id, self.cadence.retry_at(now));
            return NotifyOutcome::SendFailed;
        }
        tracing::info!("📨 Notification sent to user {} for '{}': {}", user.id, item.name, text);

        let entry = MessageLog {
            user_id: user.id,
            item_id: item.id,
            sent_at: now,
            text,
        };
        if let Err(e) = self.store.append_message_log(&entry) {
            tracing::error!("❌ Failed to log message for user {}: {e}", user.id);
        }

        self.reschedule(user.id, self.cadence.next_notification(&user, now));
        NotifyOutcome::Sent { item_id: item.id }
    }

    /// Uniform pick among items not mentioned within the cooldown; all items
    /// when every one was mentioned or the log is unreadable.
    fn pick_item(&self, user_id: UserId, items: &[Item], now: DateTime<Utc>) -> Option<Item> {
        let mut rng = rand::thread_rng();
        let recent = match self.store.recent_item_ids(user_id, self.cadence.cooldown_since(now)) {
            Ok(recent) => recent,
            Err(e) => {
                tracing::warn!("⚠️ Failed to load recent items for user {}: {e}", user_id);
                return items.choose(&mut rng).cloned();
            }
        };
        let candidates: Vec<&Item> = items.iter().filter(|i| !recent.contains(&i.id)).collect();
        if candidates.is_empty() {
            return items.choose(&mut rng).cloned();
        }
        candidates.choose(&mut rng).map(|i| (*i).clone())
    }

    fn reschedule(&self, user_id: UserId, next: DateTime<Utc>) {
        if let Err(e) = self.store.set_next_notification(user_id, next) {
            tracing::error!("❌ Failed to update next notification for user {}: {e}", user_id);
            return;
        }
        self.sessions.update(user_id, |s| {
            if let Some(user) = s.user.as_mut() {
                user.next_notification = Some(next);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::SqliteStore;
    use crate::testing::{RecordingTransport, ScriptedGenerator};
    use chrono::{Duration, TimeZone};
    use chrono_tz::Tz;
    use pingbox_core::types::{DEFAULT_DAY_END, DEFAULT_DAY_START, DEFAULT_PRESET};

    struct Fixture {
        store: Arc<SqliteStore>,
        transport: Arc<RecordingTransport>,
        notifier: ItemNotifier,
    }

    fn fixture_with(transport: RecordingTransport, generator: Option<Arc<dyn TextGenerator>>) -> Fixture {
        fixture_with_cadence(transport, generator, Cadence::default())
    }

    fn fixture_with_cadence(
        transport: RecordingTransport,
        generator: Option<Arc<dyn TextGenerator>>,
        cadence: Cadence,
    ) -> Fixture {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let transport = Arc::new(transport);
        let notifier = ItemNotifier::new(
            store.clone(),
            Arc::new(SessionStore::new(std::time::Duration::ZERO)),
            generator,
            transport.clone(),
            cadence,
            4,
        );
        Fixture { store, transport, notifier }
    }

    fn fixture() -> Fixture {
        fixture_with(RecordingTransport::default(), None)
    }

    fn msk(d: u32, h: u32, m: u32) -> DateTime<Utc> {
        let tz: Tz = "Europe/Moscow".parse().unwrap();
        tz.with_ymd_and_hms(2026, 3, d, h, m, 0).unwrap().with_timezone(&Utc)
    }

    fn add_user(store: &SqliteStore, id: UserId, next: Option<DateTime<Utc>>, items: &[&str]) -> User {
        let mut user = User::new(id, "Europe/Moscow", DEFAULT_DAY_START, DEFAULT_DAY_END, DEFAULT_PRESET);
        user.next_notification = next;
        store.upsert_user(&user).unwrap();
        for name in items {
            store.insert_item(id, name).unwrap();
        }
        user
    }

    fn next_of(store: &SqliteStore, id: UserId) -> DateTime<Utc> {
        store.find_user(id).unwrap().unwrap().next_notification.unwrap()
    }

    #[tokio::test]
    async fn test_sends_inside_window() {
        let f = fixture();
        let now = msk(10, 15, 0);
        add_user(&f.store, 1, Some(now - Duration::minutes(5)), &["a", "b"]);

        let stats = f.notifier.tick_at(now).await;
        assert_eq!(stats.sent, 1);

        let sent = f.transport.messages();
        assert_eq!(sent.len(), 1);
        let (user_id, text) = &sent[0];
        assert_eq!(*user_id, 1);
        assert!(text.starts_with("a ") || text.starts_with("b "));

        let log = f.store.message_log_for(1).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].text, *text);

        // normal preset: 60..=120 minutes later, still inside 12:00-22:00.
        let next = next_of(&f.store, 1);
        assert!(next >= now + Duration::minutes(60) && next <= now + Duration::minutes(120));
    }

    #[tokio::test]
    async fn test_outside_window_moves_to_next_start() {
        let f = fixture();
        let now = msk(10, 23, 30);
        add_user(&f.store, 1, Some(now - Duration::minutes(5)), &["a", "b"]);

        f.notifier.tick_at(now).await;
        assert!(f.transport.messages().is_empty());

        let base = msk(11, 12, 0);
        let next = next_of(&f.store, 1);
        assert!(next >= base && next <= base + Duration::minutes(60), "{next}");
    }

    #[tokio::test]
    async fn test_overdue_reschedules_without_sending() {
        let f = fixture();
        let now = msk(10, 15, 0);
        add_user(&f.store, 1, Some(now - Duration::hours(5)), &["a"]);
        add_user(&f.store, 2, None, &["a"]);

        let stats = f.notifier.tick_at(now).await;
        assert_eq!(stats.due, 2);
        assert_eq!(stats.sent, 0);
        assert!(f.transport.messages().is_empty());
        assert!(next_of(&f.store, 1) > now);
        assert!(next_of(&f.store, 2) > now);
    }

    #[tokio::test]
    async fn test_damaged_user_row_does_not_block_others() {
        let f = fixture();
        let now = msk(10, 15, 0);
        add_user(&f.store, 1, Some(now - Duration::minutes(5)), &["a"]);
        add_user(&f.store, 2, Some(now - Duration::minutes(5)), &["b"]);
        f.store.execute_sql("UPDATE users SET day_start = -1 WHERE id = 1").unwrap();

        let stats = f.notifier.tick_at(now).await;
        assert_eq!(stats.due, 2);
        assert_eq!(stats.sent, 2);
        let mut recipients: Vec<UserId> = f.transport.messages().iter().map(|(id, _)| *id).collect();
        recipients.sort_unstable();
        assert_eq!(recipients, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_no_items_reschedules() {
        let f = fixture();
        let now = msk(10, 15, 0);
        add_user(&f.store, 1, Some(now - Duration::minutes(1)), &[]);
        f.notifier.tick_at(now).await;
        assert!(f.transport.messages().is_empty());
        assert!(next_of(&f.store, 1) >= now + Duration::minutes(60));
    }

    #[tokio::test]
    async fn test_send_failure_retries_shortly() {
        let f = fixture_with(RecordingTransport::failing(), None);
        let now = msk(10, 15, 0);
        add_user(&f.store, 1, Some(now - Duration::minutes(1)), &["a"]);

        let stats = f.notifier.tick_at(now).await;
        assert_eq!(stats.failed, 1);
        assert_eq!(next_of(&f.store, 1), now + Duration::minutes(5));
        assert!(f.store.message_log_for(1).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_second_tick_is_idempotent() {
        let f = fixture();
        let now = msk(10, 15, 0);
        add_user(&f.store, 1, Some(now - Duration::minutes(5)), &["a", "b"]);

        f.notifier.tick_at(now).await;
        let stats = f.notifier.tick_at(now).await;
        assert_eq!(stats.due, 0);
        assert_eq!(f.transport.messages().len(), 1);
        assert_eq!(f.store.message_log_for(1).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cooldown_avoids_recent_item() {
        let f = fixture();
        let now = msk(10, 15, 0);
        add_user(&f.store, 1, Some(now - Duration::minutes(1)), &["a", "b"]);
        let a = f.store.items_for(1).unwrap().into_iter().find(|i| i.name == "a").unwrap();
        f.store
            .append_message_log(&MessageLog {
                user_id: 1,
                item_id: a.id,
                sent_at: now - Duration::minutes(30),
                text: "a ✨".into(),
            })
            .unwrap();

        f.notifier.tick_at(now).await;
        assert!(f.transport.messages()[0].1.starts_with("b "));
    }

    #[tokio::test]
    async fn test_all_recent_falls_back_to_any_item() {
        let f = fixture();
        let now = msk(10, 15, 0);
        add_user(&f.store, 1, Some(now - Duration::minutes(1)), &["a"]);
        let a = f.store.items_for(1).unwrap()[0].clone();
        f.store
            .append_message_log(&MessageLog { user_id: 1, item_id: a.id, sent_at: now, text: "a".into() })
            .unwrap();

        let stats = f.notifier.tick_at(now).await;
        assert_eq!(stats.sent, 1);
    }

    #[tokio::test]
    async fn test_generated_text_and_fallback() {
        let generator: Arc<dyn TextGenerator> = Arc::new(ScriptedGenerator::new("hey"));
        let f = fixture_with(RecordingTransport::default(), Some(generator));
        let now = msk(10, 15, 0);
        add_user(&f.store, 1, Some(now - Duration::minutes(1)), &["tea"]);
        add_user(&f.store, 2, Some(now - Duration::minutes(1)), &["fail"]);

        f.notifier.tick_at(now).await;
        let mut sent = f.transport.messages();
        sent.sort();
        assert_eq!(sent[0], (1, "hey tea".to_string()));
        assert!(sent[1].1.starts_with("fail "));
    }

    #[tokio::test]
    async fn test_panic_in_one_user_spares_others() {
        let generator: Arc<dyn TextGenerator> = Arc::new(ScriptedGenerator::new("hey"));
        let f = fixture_with(RecordingTransport::default(), Some(generator));
        let now = msk(10, 15, 0);
        add_user(&f.store, 1, Some(now - Duration::minutes(1)), &["boom"]);
        add_user(&f.store, 2, Some(now - Duration::minutes(1)), &["tea"]);

        let stats = f.notifier.tick_at(now).await;
        assert_eq!(stats.panicked, 1);
        assert_eq!(stats.sent, 1);
        assert_eq!(f.transport.messages(), vec![(2, "hey tea".to_string())]);
    }

    #[tokio::test]
    async fn test_generation_timeout_uses_fallback() {
        let generator: Arc<dyn TextGenerator> = Arc::new(ScriptedGenerator::new("hey"));
        let mut cadence = Cadence::default();
        cadence.generate_timeout = std::time::Duration::from_millis(50);
        let f = fixture_with_cadence(RecordingTransport::default(), Some(generator), cadence);
        let now = msk(10, 15, 0);
        add_user(&f.store, 1, Some(now - Duration::minutes(1)), &["slow"]);

        let stats = f.notifier.tick_at(now).await;
        assert_eq!(stats.sent, 1);
        assert!(f.transport.messages()[0].1.starts_with("slow "));
    }
}
