//! PingBox configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{PingBoxError, Result};
use crate::types::{DEFAULT_DAY_END, DEFAULT_DAY_START, DEFAULT_PRESET, DEFAULT_TIMEZONE};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PingBoxConfig {
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub defaults: UserDefaults,
    #[serde(default)]
    pub session: SessionConfig,
}

impl PingBoxConfig {
    /// Load config from the default path (~/.pingbox/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        let mut config = if path.exists() {
            Self::load_from(&path)?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load config from a specific path. Env overrides are not applied.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| PingBoxError::Config(format!("Failed to read config: {e}")))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| PingBoxError::Config(format!("Failed to parse config: {e}")))
    }

    /// Secrets from the environment win over the file.
    pub fn apply_env_overrides(&mut self) {
        for key in ["PINGBOX_TELEGRAM_TOKEN", "TG_BOT_TOKEN"] {
            if let Ok(token) = std::env::var(key) {
                if !token.trim().is_empty() {
                    self.telegram.bot_token = token.trim().to_string();
                    break;
                }
            }
        }
        if let Ok(path) = std::env::var("PINGBOX_DB_PATH") {
            if !path.trim().is_empty() {
                self.database.path = path.trim().to_string();
            }
        }
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| PingBoxError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Reject values the workers cannot run with.
    pub fn validate(&self) -> Result<()> {
        let s = &self.scheduler;
        if s.notify_poll_secs == 0 || s.reminder_poll_secs == 0 {
            return Err(PingBoxError::Config("poll intervals must be positive".into()));
        }
        if s.retry_minutes == 0 {
            return Err(PingBoxError::Config("retry_minutes must be positive".into()));
        }
        if s.overdue_factor.is_nan() || s.overdue_factor <= 0.0 {
            return Err(PingBoxError::Config("overdue_factor must be positive".into()));
        }
        if s.max_concurrency == 0 {
            return Err(PingBoxError::Config("max_concurrency must be at least 1".into()));
        }
        if let Some(entry) = self.llm.chain.iter().find(|p| p.provider.trim().is_empty()) {
            return Err(PingBoxError::Config(format!(
                "llm chain entry with model '{}' has no provider",
                entry.model
            )));
        }
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the PingBox home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".pingbox")
    }

    /// Database path with `~` expanded.
    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.database.path).to_string())
    }
}

/// Telegram transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default = "default_telegram_api")]
    pub api_base: String,
    #[serde(default = "default_send_timeout")]
    pub send_timeout_secs: u64,
}

fn default_telegram_api() -> String { "https://api.telegram.org".into() }
fn default_send_timeout() -> u64 { 15 }

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            api_base: default_telegram_api(),
            send_timeout_secs: default_send_timeout(),
        }
    }
}

/// Text generation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Providers in the order they are tried. Empty disables generation.
    #[serde(default = "default_chain")]
    pub chain: Vec<LlmProviderConfig>,
    /// Budget for one generated message across the whole chain.
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// File holding the system prompt.
    #[serde(default = "default_prompt_path")]
    pub prompt_path: String,
}

fn default_chain() -> Vec<LlmProviderConfig> {
    vec![
        LlmProviderConfig {
            provider: "openrouter".into(),
            model: "openrouter/auto".into(),
            api_key: String::new(),
            endpoint: String::new(),
        },
        LlmProviderConfig {
            provider: "groq".into(),
            model: "groq/compound".into(),
            api_key: String::new(),
            endpoint: String::new(),
        },
    ]
}
fn default_llm_timeout() -> u64 { 30 }
fn default_temperature() -> f32 { 0.8 }
fn default_max_tokens() -> u32 { 180 }
fn default_prompt_path() -> String { "~/.pingbox/prompt.txt".into() }

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            chain: default_chain(),
            timeout_secs: default_llm_timeout(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            prompt_path: default_prompt_path(),
        }
    }
}

/// One entry in the generation chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmProviderConfig {
    /// Registry name ("openrouter", "groq", ...) or "custom:<base url>".
    pub provider: String,
    #[serde(default)]
    pub model: String,
    /// Empty means "read from the provider's env vars".
    #[serde(default)]
    pub api_key: String,
    /// Empty means "use the registry base URL".
    #[serde(default)]
    pub endpoint: String,
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String { "~/.pingbox/pingbox.db".into() }

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: default_db_path() }
    }
}

/// Worker policy. The values here are policy, not algorithm.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Item notification worker tick.
    #[serde(default = "default_notify_poll")]
    pub notify_poll_secs: u64,
    /// Reminder worker tick.
    #[serde(default = "default_reminder_poll")]
    pub reminder_poll_secs: u64,
    /// Delay before retrying after a failed send or a muted user.
    #[serde(default = "default_retry_minutes")]
    pub retry_minutes: u32,
    /// An item mentioned within this window is not picked again.
    #[serde(default = "default_cooldown_minutes")]
    pub item_cooldown_minutes: u32,
    /// Upper bound for the random offset added to a window start.
    #[serde(default = "default_jitter_cap")]
    pub jitter_cap_minutes: u32,
    /// Overdue when late by more than `max_interval * factor + poll interval`.
    #[serde(default = "default_overdue_factor")]
    pub overdue_factor: f64,
    /// Users / reminders processed concurrently inside one tick.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Delay used when re-enabling a reminder whose schedule cannot be computed.
    #[serde(default = "default_reenable_fallback")]
    pub reenable_fallback_minutes: u32,
}

fn default_notify_poll() -> u64 { 60 }
fn default_reminder_poll() -> u64 { 30 }
fn default_retry_minutes() -> u32 { 5 }
fn default_cooldown_minutes() -> u32 { 180 }
fn default_jitter_cap() -> u32 { 60 }
fn default_overdue_factor() -> f64 { 1.0 }
fn default_max_concurrency() -> usize { 4 }
fn default_reenable_fallback() -> u32 { 60 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            notify_poll_secs: default_notify_poll(),
            reminder_poll_secs: default_reminder_poll(),
            retry_minutes: default_retry_minutes(),
            item_cooldown_minutes: default_cooldown_minutes(),
            jitter_cap_minutes: default_jitter_cap(),
            overdue_factor: default_overdue_factor(),
            max_concurrency: default_max_concurrency(),
            reenable_fallback_minutes: default_reenable_fallback(),
        }
    }
}

/// Preferences given to newly activated users and to malformed records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserDefaults {
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_day_start")]
    pub day_start: u16,
    #[serde(default = "default_day_end")]
    pub day_end: u16,
    #[serde(default = "default_preset")]
    pub preset: String,
}

fn default_timezone() -> String { DEFAULT_TIMEZONE.into() }
fn default_day_start() -> u16 { DEFAULT_DAY_START }
fn default_day_end() -> u16 { DEFAULT_DAY_END }
fn default_preset() -> String { DEFAULT_PRESET.into() }

impl Default for UserDefaults {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            day_start: default_day_start(),
            day_end: default_day_end(),
            preset: default_preset(),
        }
    }
}

/// Session cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Idle lifetime of an unauthorized session. 0 disables expiry.
    #[serde(default = "default_session_ttl")]
    pub ttl_secs: u64,
    #[serde(default = "default_cleanup_secs")]
    pub cleanup_secs: u64,
}

fn default_session_ttl() -> u64 { 1800 }
fn default_cleanup_secs() -> u64 { 900 }

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_session_ttl(),
            cleanup_secs: default_cleanup_secs(),
        }
    }
}
