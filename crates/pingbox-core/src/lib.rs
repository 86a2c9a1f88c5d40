//! # PingBox Core
//!
//! Shared building blocks for the PingBox workspace:
//! - `config`: TOML configuration with env overrides for secrets
//! - `error`: the single library error type
//! - `types`: users, items, reminders, message log entries, recurrence
//! - `traits`: storage, text generation and transport seams

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::PingBoxConfig;
pub use error::{PingBoxError, Result, ValidationError};
