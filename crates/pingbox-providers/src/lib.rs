//! # PingBox Providers
//!
//! Text generation backends for notification messages.
//!
//! Every backend speaks the OpenAI chat-completions dialect and is served by a
//! single `OpenAiCompatibleGenerator`. Several configured backends are wrapped
//! in a `FailoverGenerator` that tries them in order within one time budget.

pub mod failover;
pub mod openai_compatible;
pub mod prompt;
pub mod provider_registry;

use std::sync::Arc;
use std::time::Duration;

use pingbox_core::config::PingBoxConfig;
use pingbox_core::traits::TextGenerator;

use crate::failover::FailoverGenerator;
use crate::openai_compatible::OpenAiCompatibleGenerator;
use crate::prompt::PromptBuilder;

/// Build the generator chain from `config.llm.chain`.
///
/// Entries are either registry names or `"custom:<base url>"`; unknown names
/// are logged and skipped. `None` means no generation: callers send the
/// fallback text instead.
pub fn create_generator(config: &PingBoxConfig) -> Option<Arc<dyn TextGenerator>> {
    let prompt = Arc::new(PromptBuilder::load(&config.llm.prompt_path));

    let mut chain: Vec<Arc<dyn TextGenerator>> = Vec::new();
    for entry in &config.llm.chain {
        let name = entry.provider.trim();
        if name.starts_with("custom:") {
            chain.push(Arc::new(OpenAiCompatibleGenerator::custom(entry, &config.llm, prompt.clone())));
            continue;
        }
        match provider_registry::get_provider_config(name) {
            Some(registry) => chain.push(Arc::new(OpenAiCompatibleGenerator::from_registry(
                registry,
                entry,
                &config.llm,
                prompt.clone(),
            ))),
            None => tracing::warn!("⚠️ Unknown provider '{}' in llm.chain, skipping", name),
        }
    }

    match chain.len() {
        0 => {
            tracing::info!("📝 No text generator configured; using fallback texts");
            None
        }
        1 => chain.pop(),
        n => {
            tracing::info!("🔗 Generator chain: {} providers", n);
            Some(Arc::new(FailoverGenerator::new(
                chain,
                Duration::from_secs(config.llm.timeout_secs),
            )))
        }
    }
}

/// List all available provider names.
pub fn available_providers() -> Vec<&'static str> {
    let mut names = provider_registry::all_provider_names();
    names.push("custom");
    names
}

/// Every available provider, flagged when `config.llm.chain` uses it.
pub fn provider_listing(config: &PingBoxConfig) -> Vec<(&'static str, bool)> {
    available_providers()
        .into_iter()
        .map(|name| {
            let used = config.llm.chain.iter().any(|entry| {
                let configured = entry.provider.trim();
                configured == name || (name == "custom" && configured.starts_with("custom:"))
            });
            (name, used)
        })
        .collect()
}
