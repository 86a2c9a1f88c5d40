//! Scheduler Engine: runs both workers and the session cleanup on tokio
//! intervals until cancelled.
//!
//! Each loop ticks once immediately, then on its fixed period. Cancellation
//! is observed between ticks, so a tick in flight always finishes.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use pingbox_core::config::PingBoxConfig;
use pingbox_core::traits::{Store, TextGenerator, Transport};

use crate::TickStats;
use crate::cadence::Cadence;
use crate::notifier::ItemNotifier;
use crate::reminders::ReminderWorker;
use crate::session::SessionStore;

/// Owns the workers and their background tasks.
pub struct SchedulerEngine {
    notifier: Arc<ItemNotifier>,
    reminders: Arc<ReminderWorker>,
    sessions: Arc<SessionStore>,
    notify_every: Duration,
    remind_every: Duration,
    cleanup_every: Duration,
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl SchedulerEngine {
    pub fn new(
        config: &PingBoxConfig,
        store: Arc<dyn Store>,
        sessions: Arc<SessionStore>,
        generator: Option<Arc<dyn TextGenerator>>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let cadence = Cadence::from_config(config);
        let fan_out = config.scheduler.max_concurrency;
        let notifier = ItemNotifier::new(
            store.clone(),
            sessions.clone(),
            generator.clone(),
            transport.clone(),
            cadence.clone(),
            fan_out,
        );
        let reminders = ReminderWorker::new(store, sessions.clone(), generator, transport, cadence, fan_out);
        Self {
            notifier: Arc::new(notifier),
            reminders: Arc::new(reminders),
            sessions,
            notify_every: Duration::from_secs(config.scheduler.notify_poll_secs),
            remind_every: Duration::from_secs(config.scheduler.reminder_poll_secs),
            cleanup_every: Duration::from_secs(config.session.cleanup_secs),
            cancel: CancellationToken::new(),
            handles: Vec::new(),
        }
    }

    /// Override the worker periods.
    pub fn with_intervals(mut self, notify_every: Duration, remind_every: Duration) -> Self {
        self.notify_every = notify_every;
        self.remind_every = remind_every;
        self
    }

    /// Token that stops every loop when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_running(&self) -> bool {
        !self.handles.is_empty() && !self.cancel.is_cancelled()
    }

    /// Spawn the item loop, the reminder loop and the session cleanup.
    /// Calling it again while running is a no-op.
    pub fn start(&mut self) {
        if !self.handles.is_empty() {
            tracing::warn!("⚠️ Scheduler already started");
            return;
        }
        tracing::info!(
            "⏰ Scheduler started (items every {}s, reminders every {}s)",
            self.notify_every.as_secs(),
            self.remind_every.as_secs()
        );

        let notifier = self.notifier.clone();
        self.handles.push(spawn_worker_loop("items", self.notify_every, self.cancel.clone(), move || {
            let notifier = notifier.clone();
            async move { notifier.tick().await }
        }));

        let reminders = self.reminders.clone();
        self.handles.push(spawn_worker_loop("reminders", self.remind_every, self.cancel.clone(), move || {
            let reminders = reminders.clone();
            async move { reminders.tick().await }
        }));

        self.handles
            .push(self.sessions.clone().spawn_cleanup(self.cleanup_every, self.cancel.clone()));
    }

    /// Cancel and wait for every loop to finish its current tick.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                tracing::error!("❌ Scheduler task ended abnormally: {e}");
            }
        }
        tracing::info!("🛑 Scheduler stopped");
    }
}

/// Run `tick` now and then every `every` until `cancel` fires.
pub fn spawn_worker_loop<F, Fut>(
    name: &'static str,
    every: Duration,
    cancel: CancellationToken,
    tick: F,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = TickStats> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every.max(Duration::from_millis(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            let stats = tick().await;
            if stats.due > 0 {
                tracing::info!(
                    "📊 {} tick: {} due, {} sent, {} failed, {} deferred, {} panicked",
                    name,
                    stats.due,
                    stats.sent,
                    stats.failed,
                    stats.deferred,
                    stats.panicked
                );
            }
        }
        tracing::debug!("{} loop stopped", name);
    })
}
