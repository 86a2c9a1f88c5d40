//! Error types for PingBox.

use thiserror::Error;

/// Library-wide result alias.
pub type Result<T> = std::result::Result<T, PingBoxError>;

/// Every failure a PingBox library call can report.
#[derive(Debug, Error)]
pub enum PingBoxError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("API key missing for provider: {0}")]
    ApiKeyMissing(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Timed out after {0}s: {1}")]
    Timeout(u64, String),

    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Duplicate: {0}")]
    Duplicate(String),

    #[error("Limit reached: {0}")]
    LimitReached(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// User-input validation failures. Surfaced by the services as messages,
/// never by the background workers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("name is empty")]
    EmptyName,
    #[error("name is longer than {0} characters")]
    NameTooLong(usize),
    #[error("interval must be between 1 and 1440 minutes, got {0}")]
    InvalidInterval(i64),
    #[error("time of day must be between 00:00 and 23:59, got minute {0}")]
    InvalidTimeOfDay(i64),
    #[error("weekday must be between 0 and 6, got {0}")]
    InvalidWeekday(i64),
    #[error("day of month must be between 1 and 31, got {0}")]
    InvalidMonthDay(i64),
    #[error("active window {0}..{1} is not valid")]
    InvalidWindow(i64, i64),
    #[error("notification range {0}..{1} minutes is not valid")]
    InvalidRange(i64, i64),
    #[error("unknown timezone '{0}'")]
    UnknownTimezone(String),
}

impl PingBoxError {
    /// Whether the failure is worth a short retry rather than giving up.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PingBoxError::Http(_)
                | PingBoxError::Transport(_)
                | PingBoxError::Timeout(..)
                | PingBoxError::Provider(_)
        )
    }
}
