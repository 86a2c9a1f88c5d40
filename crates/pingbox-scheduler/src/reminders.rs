//! Reminder worker: fires user-defined reminders when they come due.
//!
//! Reminders obey the owner's mute flag and active window. After a successful
//! send a one-shot reminder is deleted and a recurring one is moved to its
//! next occurrence; a schedule that cannot be computed disables the reminder.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::{FutureExt, StreamExt};

use pingbox_core::traits::{ReminderRepository, Store, TextGenerator, Transport, UserRepository};
use pingbox_core::types::{Reminder, ReminderId, UserId};

use crate::cadence::{Cadence, deliver, generation_context, text_or_fallback};
use crate::recurrence::compute_next;
use crate::session::SessionStore;
use crate::{TickStats, panic_message};

/// What happened to one due reminder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReminderOutcome {
    /// Owner no longer exists; reminder disabled.
    OrphanDisabled,
    /// Owner could not be read; left for the next tick.
    StorageError,
    Muted,
    OutsideWindow,
    SendFailed,
    Deleted,
    Rescheduled(DateTime<Utc>),
    /// Fired, but the next occurrence could not be computed.
    Disabled,
}

pub struct ReminderWorker {
    store: Arc<dyn Store>,
    sessions: Arc<SessionStore>,
    generator: Option<Arc<dyn TextGenerator>>,
    transport: Arc<dyn Transport>,
    cadence: Cadence,
    max_concurrency: usize,
}

impl ReminderWorker {
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

    /// One pass over every reminder due at `now`.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> TickStats {
        let due = match self.store.reminders_due(now) {
            Ok(due) => due,
            Err(e) => {
                tracing::error!("❌ Failed to load due reminders: {e}");
                return TickStats::default();
            }
        };
        tracing::debug!("Reminder tick: {} reminder(s) due at {}", due.len(), now);

        let outcomes: Vec<Option<ReminderOutcome>> = futures::stream::iter(due)
            .map(|reminder| {
                let id = reminder.id;
                async move {
                    match AssertUnwindSafe(self.process(reminder, now)).catch_unwind().await {
                        Ok(outcome) => Some(outcome),
                        Err(payload) => {
                            tracing::error!("💥 Reminder {} panicked: {}", id, panic_message(&*payload));
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
                Some(ReminderOutcome::Deleted | ReminderOutcome::Rescheduled(_) | ReminderOutcome::Disabled) => {
                    stats.sent += 1
                }
                Some(ReminderOutcome::SendFailed) => stats.failed += 1,
                Some(_) => stats.deferred += 1,
                None => stats.panicked += 1,
            }
        }
        stats
    }

    async fn process(&self, reminder: Reminder, now: DateTime<Utc>) -> ReminderOutcome {
        let owner = self
            .sessions
            .user_or_load(reminder.user_id, || self.store.find_user(reminder.user_id));
        let user = match owner {
            Ok(Some(user)) => user,
            Ok(None) => {
                tracing::warn!("⚠️ Reminder {} has no owner {}; disabling", reminder.id, reminder.user_id);
                self.disable(reminder.user_id, reminder.id);
                return ReminderOutcome::OrphanDisabled;
            }
            Err(e) => {
                tracing::error!("❌ Failed to load owner of reminder {}: {e}", reminder.id);
                return ReminderOutcome::StorageError;
            }
        };

        if user.muted {
            self.set_next_run(user.id, reminder.id, self.cadence.retry_at(now));
            return ReminderOutcome::Muted;
        }

        if !self.cadence.in_window(&user, now) {
            let next = self.cadence.next_window_start(&user, now);
            tracing::debug!("Reminder {} outside active hours; next start {}", reminder.id, next);
            self.set_next_run(user.id, reminder.id, next);
            return ReminderOutcome::OutsideWindow;
        }

        let tz = self.cadence.timezone_for(&user);
        let context = generation_context(&reminder.name, &now.with_timezone(&tz), user.mode);
        let text = text_or_fallback(self.generator.as_ref(), &context, self.cadence.generate_timeout).await;

        if let Err(e) = deliver(self.transport.as_ref(), user.id, &text, self.cadence.send_timeout).await {
            tracing::warn!("⚠️ Reminder {} to user {} failed: {e}", reminder.id, user.id);
            self.set_next_run(user.id, reminder.id, self.cadence.retry_at(now));
            return ReminderOutcome::SendFailed;
        }
        tracing::info!("⏰ Reminder '{}' sent to user {}", reminder.name, user.id);

        if reminder.recurrence.is_one_shot() {
            if let Err(e) = self.store.delete_reminder(reminder.id) {
                tracing::error!("❌ Failed to delete one-shot reminder {}: {e}", reminder.id);
            }
            self.forget_reminders(user.id);
            return ReminderOutcome::Deleted;
        }

        let Some(next) = compute_next(&reminder.recurrence, now, &tz) else {
            tracing::warn!("⚠️ Reminder {} has an invalid schedule; disabling", reminder.id);
            self.disable(user.id, reminder.id);
            return ReminderOutcome::Disabled;
        };
        let updated = Reminder {
            next_run: next,
            last_run: Some(now),
            ..reminder
        };
        if let Err(e) = self.store.update_reminder(&updated) {
            tracing::error!("❌ Failed to reschedule reminder {}: {e}", updated.id);
        }
        self.forget_reminders(user.id);
        tracing::debug!("Reminder {} next run {}", updated.id, next);
        ReminderOutcome::Rescheduled(next)
    }

    fn set_next_run(&self, user_id: UserId, id: ReminderId, at: DateTime<Utc>) {
        if let Err(e) = self.store.set_next_run(id, at) {
            tracing::error!("❌ Failed to set next run of reminder {}: {e}", id);
        }
        self.forget_reminders(user_id);
    }

    fn disable(&self, user_id: UserId, id: ReminderId) {
        if let Err(e) = self.store.disable_reminder(id) {
            tracing::error!("❌ Failed to disable reminder {}: {e}", id);
        }
        self.forget_reminders(user_id);
    }

    fn forget_reminders(&self, user_id: UserId) {
        self.sessions.update(user_id, |s| s.reminders = None);
    }
}
