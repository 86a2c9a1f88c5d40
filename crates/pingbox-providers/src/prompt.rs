//! Prompt building and model output cleanup.

use std::path::Path;

use pingbox_core::types::GenerationContext;

/// System prompt used when no prompt file is configured or readable.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You write one short, warm notification (max 160 characters) \
reminding the reader about the thing named in current_entity. Match style_mode: \
cozy is gentle and homely, rofl is playful and absurd, care is soft and supportive. \
Let time_of_day colour the wording. Use random_seed only to vary phrasing. \
Reply with the notification text only, on a single line, without quotes or explanations.";

/// Holds the system prompt and renders per-message user prompts.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    system: String,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self {
            system: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

impl PromptBuilder {
    pub fn new(system: impl Into<String>) -> Self {
        Self { system: system.into() }
    }

    /// Read the system prompt from `path` (`~` expanded). A missing or empty
    /// file falls back to the built-in prompt.
    pub fn load(path: &str) -> Self {
        if path.trim().is_empty() {
            return Self::default();
        }
        let expanded = shellexpand::tilde(path.trim()).to_string();
        match std::fs::read_to_string(Path::new(&expanded)) {
            Ok(content) if !content.trim().is_empty() => {
                tracing::info!("📝 Loaded system prompt from {}", expanded);
                Self::new(content.trim())
            }
            Ok(_) => {
                tracing::warn!("⚠️ Prompt file {} is empty; using built-in prompt", expanded);
                Self::default()
            }
            Err(e) => {
                tracing::debug!("Prompt file {} not readable ({e}); using built-in prompt", expanded);
                Self::default()
            }
        }
    }

    pub fn system(&self) -> &str {
        &self.system
    }

    /// `{"current_entity", "time_of_day", "style_mode", "random_seed"}` as JSON.
    pub fn build_user(&self, context: &GenerationContext) -> String {
        serde_json::json!({
            "current_entity": context.entity_name,
            "time_of_day": context.time_of_day.as_str(),
            "style_mode": context.style.as_str(),
            "random_seed": context.random_seed,
        })
        .to_string()
    }
}

/// Strip a surrounding code fence (and a `json`/`text` tag), then keep only
/// the last non-empty line. Models that think out loud put the answer last.
pub fn clean_llm_text(raw: &str) -> String {
    let mut text = raw.trim();
    if let Some(rest) = text.strip_prefix("```") {
        text = rest.trim();
        if let Some(idx) = text.rfind("```") {
            text = text[..idx].trim();
        }
        if let Some((first, rest)) = text.split_once('\n') {
            let tag = first.trim();
            if tag.eq_ignore_ascii_case("json") || tag.eq_ignore_ascii_case("text") {
                text = rest.trim();
            }
        }
    }
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .last()
        .unwrap_or_default()
        .to_string()
}
