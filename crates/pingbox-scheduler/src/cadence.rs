//! Cadence: when to ping next, what to say when generation fails, and the
//! timeout-wrapped calls to the generator and transport.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use rand::Rng;
use rand::seq::SliceRandom;

use pingbox_core::config::PingBoxConfig;
use pingbox_core::error::{PingBoxError, Result};
use pingbox_core::traits::{TextGenerator, Transport};
use pingbox_core::types::{GenerationContext, TimeOfDay, User, UserId, UserMode};

use crate::window::{ActiveWindow, resolve_timezone};

/// Decorative tokens appended to fallback text.
pub const FALLBACK_TOKENS: &[&str] = &["✨", "🌿", "☕", "🫶", "🌙", "🍀", "💫", "🌼"];

/// Scheduling policy shared by both workers and the services.
#[derive(Debug, Clone)]
pub struct Cadence {
    pub default_timezone: String,
    /// Item worker tick; part of the overdue tolerance.
    pub notify_poll: Duration,
    pub retry: Duration,
    pub item_cooldown: Duration,
    pub jitter_cap_minutes: u32,
    pub overdue_factor: f64,
    pub reenable_fallback: Duration,
    pub generate_timeout: std::time::Duration,
    pub send_timeout: std::time::Duration,
}

impl Default for Cadence {
    fn default() -> Self {
        Self::from_config(&PingBoxConfig::default())
    }
}

impl Cadence {
    pub fn from_config(config: &PingBoxConfig) -> Self {
        let s = &config.scheduler;
        Self {
            default_timezone: config.defaults.timezone.clone(),
            notify_poll: Duration::seconds(s.notify_poll_secs as i64),
            retry: Duration::minutes(i64::from(s.retry_minutes)),
            item_cooldown: Duration::minutes(i64::from(s.item_cooldown_minutes)),
            jitter_cap_minutes: s.jitter_cap_minutes,
            overdue_factor: s.overdue_factor,
            reenable_fallback: Duration::minutes(i64::from(s.reenable_fallback_minutes)),
            generate_timeout: std::time::Duration::from_secs(config.llm.timeout_secs),
            send_timeout: std::time::Duration::from_secs(config.telegram.send_timeout_secs),
        }
    }

    pub fn timezone_for(&self, user: &User) -> Tz {
        resolve_timezone(&user.timezone, &self.default_timezone)
    }

    /// Zone for new users and for output with no user attached.
    pub fn default_tz(&self) -> Tz {
        resolve_timezone("", &self.default_timezone)
    }

    pub fn retry_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + self.retry
    }

    /// Start of the item cooldown window.
    pub fn cooldown_since(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.item_cooldown
    }

    /// Whether `now` falls in the user's active window, in their timezone.
    pub fn in_window(&self, user: &User, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&self.timezone_for(user));
        ActiveWindow::for_user(user).contains_local(&local)
    }

    /// Next window start after `now`, with jitter.
    pub fn next_window_start(&self, user: &User, now: DateTime<Utc>) -> DateTime<Utc> {
        let local = now.with_timezone(&self.timezone_for(user));
        ActiveWindow::for_user(user).next_start(&local, self.jitter_cap_minutes)
    }

    /// A fresh random ambient notification time.
    pub fn next_notification(&self, user: &User, now: DateTime<Utc>) -> DateTime<Utc> {
        let (min, max) = user.notification_range();
        let minutes = rand::thread_rng().gen_range(min..=max);
        self.next_notification_after(user, now, minutes)
    }

    /// `now + minutes`, snapped to the next window start if that lands outside
    /// the window.
    pub fn next_notification_after(&self, user: &User, now: DateTime<Utc>, minutes: u32) -> DateTime<Utc> {
        let tz = self.timezone_for(user);
        let candidate = (now + Duration::minutes(i64::from(minutes))).with_timezone(&tz);
        let window = ActiveWindow::for_user(user);
        if window.contains_local(&candidate) {
            candidate.with_timezone(&Utc)
        } else {
            window.next_start(&candidate, self.jitter_cap_minutes)
        }
    }

    /// A never-scheduled user is overdue; otherwise late by more than
    /// `max_interval * overdue_factor + notify_poll`.
    pub fn is_overdue(&self, user: &User, now: DateTime<Utc>) -> bool {
        let Some(next) = user.next_notification else {
            return true;
        };
        let late_by = now - next;
        if late_by <= Duration::zero() {
            return false;
        }
        let (_, max) = user.notification_range();
        let tolerance_secs = (f64::from(max) * 60.0 * self.overdue_factor).round() as i64;
        late_by > Duration::seconds(tolerance_secs) + self.notify_poll
    }
}

/// `"<name> <token>"`, or the token alone for a blank name.
pub fn fallback_text(name: &str) -> String {
    let token = FALLBACK_TOKENS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or_default();
    let name = name.trim();
    if name.is_empty() {
        token.to_string()
    } else if token.is_empty() {
        name.to_string()
    } else {
        format!("{name} {token}")
    }
}

pub fn generation_context(entity_name: &str, local_now: &DateTime<Tz>, style: UserMode) -> GenerationContext {
    use chrono::Timelike;
    GenerationContext {
        entity_name: entity_name.to_string(),
        time_of_day: TimeOfDay::from_hour(local_now.hour()),
        style,
        random_seed: rand::thread_rng().gen_range(1..=1_000_000),
    }
}

/// Ask the generator for text within `timeout`, falling back to
/// [`fallback_text`] on error, timeout, or blank output.
pub async fn text_or_fallback(
    generator: Option<&Arc<dyn TextGenerator>>,
    context: &GenerationContext,
    timeout: std::time::Duration,
) -> String {
    let Some(generator) = generator else {
        return fallback_text(&context.entity_name);
    };
    match tokio::time::timeout(timeout, generator.generate(context)).await {
        Ok(Ok(text)) if !text.trim().is_empty() => text.trim().to_string(),
        Ok(Ok(_)) => {
            tracing::warn!("⚠️ {} returned empty text for '{}'", generator.name(), context.entity_name);
            fallback_text(&context.entity_name)
        }
        Ok(Err(e)) => {
            tracing::warn!("⚠️ {} failed for '{}': {e}", generator.name(), context.entity_name);
            fallback_text(&context.entity_name)
        }
        Err(_) => {
            tracing::warn!(
                "⏱️ {} timed out after {}s for '{}'",
                generator.name(),
                timeout.as_secs(),
                context.entity_name
            );
            fallback_text(&context.entity_name)
        }
    }
}

/// Send within `timeout`; a timeout is a transport failure.
pub async fn deliver(
    transport: &dyn Transport,
    user_id: UserId,
    text: &str,
    timeout: std::time::Duration,
) -> Result<()> {
    match tokio::time::timeout(timeout, transport.send(user_id, text)).await {
        Ok(result) => result,
        Err(_) => Err(PingBoxError::Timeout(
            timeout.as_secs(),
            format!("{} send to {user_id}", transport.name()),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pingbox_core::types::{DEFAULT_DAY_END, DEFAULT_DAY_START, DEFAULT_PRESET};

    fn moscow_user() -> User {
        User::new(1, "Europe/Moscow", DEFAULT_DAY_START, DEFAULT_DAY_END, DEFAULT_PRESET)
    }

    fn msk(h: u32, m: u32) -> DateTime<Utc> {
        let tz: Tz = "Europe/Moscow".parse().unwrap();
        tz.with_ymd_and_hms(2026, 3, 10, h, m, 0).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_fallback_text() {
        let text = fallback_text("  tea ");
        let (name, token) = text.split_once(' ').unwrap();
        assert_eq!(name, "tea");
        assert!(FALLBACK_TOKENS.contains(&token));

        let blank = fallback_text("   ");
        assert!(FALLBACK_TOKENS.contains(&blank.as_str()));
    }

    #[test]
    fn test_default_tz() {
        assert_eq!(Cadence::default().default_tz(), Tz::Europe__Moscow);
        let cadence = Cadence { default_timezone: "Mars/Olympus".into(), ..Cadence::default() };
        assert_eq!(cadence.default_tz(), Tz::UTC);
    }

    #[test]
    fn test_next_notification_inside_window() {
        let cadence = Cadence::default();
        let user = moscow_user();
        let next = cadence.next_notification_after(&user, msk(15, 0), 90);
        assert_eq!(next, msk(16, 30));
    }

    #[test]
    fn test_next_notification_snaps_to_window() {
        let cadence = Cadence::default();
        let user = moscow_user();
        // 21:30 + 90 min = 23:00, outside; next start is tomorrow 12:00 + jitter.
        let next = cadence.next_notification_after(&user, msk(21, 30), 90);
        let base = msk(12, 0) + Duration::days(1);
        assert!(next >= base && next <= base + Duration::minutes(60));
    }

    #[test]
    fn test_next_notification_respects_range() {
        let cadence = Cadence::default();
        let user = moscow_user();
        let now = msk(12, 0);
        for _ in 0..50 {
            let next = cadence.next_notification(&user, now);
            assert!(next >= now + Duration::minutes(60));
            assert!(next <= now + Duration::minutes(120));
        }
    }

    #[test]
    fn test_overdue_threshold() {
        let cadence = Cadence::default();
        let mut user = moscow_user();
        let now = msk(15, 0);

        user.next_notification = None;
        assert!(cadence.is_overdue(&user, now));

        // normal preset: max 120 min, poll 60 s.
        user.next_notification = Some(now - Duration::minutes(5));
        assert!(!cadence.is_overdue(&user, now));
        user.next_notification = Some(now - Duration::minutes(121));
        assert!(!cadence.is_overdue(&user, now));
        user.next_notification = Some(now - Duration::minutes(122));
        assert!(cadence.is_overdue(&user, now));
        user.next_notification = Some(now + Duration::minutes(10));
        assert!(!cadence.is_overdue(&user, now));
    }

    #[test]
    fn test_overdue_factor_scales() {
        let mut cadence = Cadence::default();
        cadence.overdue_factor = 2.0;
        let mut user = moscow_user();
        let now = msk(15, 0);
        user.next_notification = Some(now - Duration::minutes(200));
        assert!(!cadence.is_overdue(&user, now));
        user.next_notification = Some(now - Duration::minutes(242));
        assert!(cadence.is_overdue(&user, now));
    }

    #[test]
    fn test_generation_context_bucket() {
        let tz: Tz = "Europe/Moscow".parse().unwrap();
        let local = msk(19, 0).with_timezone(&tz);
        let ctx = generation_context("tea", &local, UserMode::Rofl);
        assert_eq!(ctx.time_of_day, TimeOfDay::Evening);
        assert_eq!(ctx.style, UserMode::Rofl);
        assert!((1..=1_000_000).contains(&ctx.random_seed));
    }
}
