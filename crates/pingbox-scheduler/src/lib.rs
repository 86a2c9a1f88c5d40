//! # PingBox Scheduler
//!
//! Time-driven delivery of ambient item nudges and user-defined reminders.
//!
//! ## Design Principles
//! - SQLite persistence: survives restarts, nothing held only in memory
//! - Tokio timers only: two fixed-interval workers, idle between ticks
//! - Every decision is made in the user's own timezone and active window
//! - One user or reminder failing never stops the rest of a tick
//!
//! ## Architecture
//! ```text
//! SchedulerEngine (tokio interval, CancellationToken)
//!   ├── ItemNotifier   every notify_poll_secs
//!   │     users due → mute / overdue / window checks
//!   │               → pick item (cooldown) → TextGenerator → Transport
//!   │               → message log → next random notification time
//!   ├── ReminderWorker every reminder_poll_secs
//!   │     reminders due → owner mute / window checks
//!   │                   → TextGenerator → Transport
//!   │                   → delete (once) | compute_next | disable
//!   └── SessionStore cleanup loop
//!
//! Services (ItemService, ReminderService, UserService)
//!   └── validate → SqliteStore → SessionStore write-through
//! ```

pub mod cadence;
pub mod dispatch;
pub mod engine;
pub mod notifier;
pub mod persistence;
pub mod recurrence;
pub mod reminders;
pub mod service;
pub mod session;
pub mod window;

#[cfg(test)]
mod testing;

pub use cadence::Cadence;
pub use dispatch::TelegramTransport;
pub use engine::SchedulerEngine;
pub use notifier::{ItemNotifier, NotifyOutcome};
pub use persistence::SqliteStore;
pub use recurrence::compute_next;
pub use reminders::{ReminderOutcome, ReminderWorker};
pub use service::{ItemService, ReminderService, UserService};
pub use session::{Session, SessionStore};
pub use window::ActiveWindow;

/// Counters for one worker tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickStats {
    /// Units picked up this tick.
    pub due: usize,
    pub sent: usize,
    pub failed: usize,
    /// Skipped or pushed back without sending (muted, outside window, ...).
    pub deferred: usize,
    pub panicked: usize,
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message_payloads() {
        let payload = std::panic::catch_unwind(|| panic!("plain")).unwrap_err();
        assert_eq!(panic_message(&*payload), "plain");

        let payload = std::panic::catch_unwind(|| panic!("formatted {}", 42)).unwrap_err();
        assert_eq!(panic_message(&*payload), "formatted 42");

        let payload = std::panic::catch_unwind(|| std::panic::panic_any(7u8)).unwrap_err();
        assert_eq!(panic_message(&*payload), "unknown panic");
    }
}
