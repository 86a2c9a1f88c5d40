//! Generator failover: try each provider in order within one time budget.
//!
//! A provider that failed `max_failures` times in a row is skipped until its
//! cooldown has passed; one success resets it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;

use pingbox_core::error::{PingBoxError, Result};
use pingbox_core::traits::TextGenerator;
use pingbox_core::types::GenerationContext;

const MAX_FAILURES: u32 = 3;
const COOLDOWN_SECS: u64 = 60;

/// Per-provider health tracking.
struct GeneratorSlot {
    generator: Arc<dyn TextGenerator>,
    /// Consecutive failure count.
    failures: AtomicU32,
    /// Unix secs of the last failure, 0 = never failed.
    last_failure: AtomicU64,
}

impl GeneratorSlot {
    fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self {
            generator,
            failures: AtomicU32::new(0),
            last_failure: AtomicU64::new(0),
        }
    }

    fn is_healthy(&self) -> bool {
        self.is_healthy_at(unix_now())
    }

    fn is_healthy_at(&self, now_secs: u64) -> bool {
        if self.failures.load(Ordering::Relaxed) < MAX_FAILURES {
            return true;
        }
        let last = self.last_failure.load(Ordering::Relaxed);
        now_secs.saturating_sub(last) > COOLDOWN_SECS
    }

    fn record_success(&self) {
        self.failures.store(0, Ordering::Relaxed);
    }

    fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        self.last_failure.store(unix_now(), Ordering::Relaxed);
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Tries generators in order, skipping unhealthy ones, all within `budget`.
pub struct FailoverGenerator {
    slots: Vec<GeneratorSlot>,
    budget: Duration,
}

impl FailoverGenerator {
    /// First generator is primary, the rest are fallbacks.
    pub fn new(generators: Vec<Arc<dyn TextGenerator>>, budget: Duration) -> Self {
        Self {
            slots: generators.into_iter().map(GeneratorSlot::new).collect(),
            budget,
        }
    }

    /// `(name, healthy, consecutive failures)` per provider.
    fn health_status(&self) -> Vec<(&str, bool, u32)> {
        self.slots
            .iter()
            .map(|s| {
                (
                    s.generator.name(),
                    s.is_healthy(),
                    s.failures.load(Ordering::Relaxed),
                )
            })
            .collect()
    }
}

#[async_trait]
impl TextGenerator for FailoverGenerator {
    fn name(&self) -> &str {
        self.slots
            .first()
            .map(|s| s.generator.name())
            .unwrap_or("failover")
    }

    async fn generate(&self, context: &GenerationContext) -> Result<String> {
        let deadline = Instant::now() + self.budget;
        let mut last_error = None;

        for (idx, slot) in self.slots.iter().enumerate() {
            if !slot.is_healthy() {
                tracing::debug!(
                    "⏭️ Skipping unhealthy provider: {} ({} failures)",
                    slot.generator.name(),
                    slot.failures.load(Ordering::Relaxed)
                );
                continue;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                last_error = Some(PingBoxError::Timeout(
                    self.budget.as_secs(),
                    "generation budget exhausted".into(),
                ));
                break;
            }

            match tokio::time::timeout(remaining, slot.generator.generate(context)).await {
                Ok(Ok(text)) => {
                    if idx > 0 {
                        tracing::info!(
                            "🔄 Failover: {} → {} (success)",
                            self.slots[0].generator.name(),
                            slot.generator.name()
                        );
                    }
                    slot.record_success();
                    return Ok(text);
                }
                Ok(Err(e)) => {
                    slot.record_failure();
                    tracing::warn!(
                        "⚠️ Provider {} failed (attempt {}): {}",
                        slot.generator.name(),
                        slot.failures.load(Ordering::Relaxed),
                        e
                    );
                    last_error = Some(e);
                }
                Err(_) => {
                    slot.record_failure();
                    tracing::warn!("⏱️ Provider {} ran out of time", slot.generator.name());
                    last_error = Some(PingBoxError::Timeout(
                        self.budget.as_secs(),
                        format!("{} generate", slot.generator.name()),
                    ));
                    break;
                }
            }
        }

        tracing::warn!("❌ No provider produced text; chain health: {:?}", self.health_status());
        Err(last_error.unwrap_or_else(|| PingBoxError::Provider("All providers unhealthy".into())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pingbox_core::types::{TimeOfDay, UserMode};
    use std::sync::atomic::AtomicUsize;

    struct Fake {
        name: &'static str,
        reply: Option<&'static str>,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl Fake {
        fn ok(name: &'static str, reply: &'static str) -> Arc<Self> {
            Arc::new(Self { name, reply: Some(reply), delay: Duration::ZERO, calls: AtomicUsize::new(0) })
        }

        fn failing(name: &'static str) -> Arc<Self> {
            Arc::new(Self { name, reply: None, delay: Duration::ZERO, calls: AtomicUsize::new(0) })
        }

        fn slow(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                reply: Some("late"),
                delay: Duration::from_secs(30),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl TextGenerator for Fake {
        fn name(&self) -> &str {
            self.name
        }

        async fn generate(&self, _context: &GenerationContext) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.reply
                .map(String::from)
                .ok_or_else(|| PingBoxError::Provider(format!("{} is down", self.name)))
        }
    }

    fn context() -> GenerationContext {
        GenerationContext {
            entity_name: "tea".into(),
            time_of_day: TimeOfDay::Day,
            style: UserMode::Care,
            random_seed: 1,
        }
    }

    #[tokio::test]
    async fn test_falls_through_to_next_provider() {
        let primary = Fake::failing("openrouter");
        let backup = Fake::ok("groq", "tea time");
        let chain = FailoverGenerator::new(vec![primary.clone(), backup.clone()], Duration::from_secs(5));

        assert_eq!(chain.generate(&context()).await.unwrap(), "tea time");
        assert_eq!(chain.name(), "openrouter");
        assert_eq!(chain.health_status()[0], ("openrouter", true, 1));
        assert_eq!(backup.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_skips_provider_after_repeated_failures() {
        let primary = Fake::failing("openrouter");
        let backup = Fake::ok("groq", "hi");
        let chain = FailoverGenerator::new(vec![primary.clone(), backup], Duration::from_secs(5));

        for _ in 0..5 {
            chain.generate(&context()).await.unwrap();
        }
        // Three failures, then skipped during the cooldown.
        assert_eq!(primary.calls.load(Ordering::SeqCst), 3);
        assert!(!chain.health_status()[0].1);
    }

    #[tokio::test]
    async fn test_all_failing_returns_last_error() {
        let chain = FailoverGenerator::new(
            vec![Fake::failing("a"), Fake::failing("b")],
            Duration::from_secs(5),
        );
        let err = chain.generate(&context()).await.unwrap_err();
        assert!(err.to_string().contains("b is down"));
    }

    #[tokio::test]
    async fn test_budget_is_shared() {
        let backup = Fake::ok("b", "never reached");
        let chain = FailoverGenerator::new(vec![Fake::slow("a"), backup.clone()], Duration::from_millis(50));
        let err = chain.generate(&context()).await.unwrap_err();
        assert!(matches!(err, PingBoxError::Timeout(..)));
        assert_eq!(backup.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_cooldown_expiry() {
        let slot = GeneratorSlot::new(Fake::failing("a"));
        for _ in 0..MAX_FAILURES {
            slot.record_failure();
        }
        let now = unix_now();
        assert!(!slot.is_healthy_at(now));
        assert!(slot.is_healthy_at(now + COOLDOWN_SECS + 1));
        slot.record_success();
        assert!(slot.is_healthy_at(now));
    }

    #[tokio::test]
    async fn test_whole_chain_in_cooldown() {
        let only = Fake::failing("a");
        let chain = FailoverGenerator::new(vec![only.clone()], Duration::from_secs(5));
        for _ in 0..MAX_FAILURES {
            chain.generate(&context()).await.unwrap_err();
        }
        let err = chain.generate(&context()).await.unwrap_err();
        assert!(err.to_string().contains("All providers unhealthy"));
        assert_eq!(only.calls.load(Ordering::SeqCst), MAX_FAILURES as usize);
        assert_eq!(chain.health_status(), vec![("a", false, MAX_FAILURES)]);
    }

    #[tokio::test]
    async fn test_empty_chain() {
        let chain = FailoverGenerator::new(Vec::new(), Duration::from_secs(1));
        assert!(chain.health_status().is_empty());
        assert!(chain.generate(&context()).await.is_err());
    }
}
