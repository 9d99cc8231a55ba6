//! Error types for the moderation core

use thiserror::Error;

/// Result type alias for moderation operations
pub type ModerationResult<T> = Result<T, ModerationError>;

/// Errors that can occur while tracking violations and applying punishments
#[derive(Error, Debug)]
pub enum ModerationError {
    #[error("Store error: {0}")]
    Store(#[from] sled::Error),

    #[error("Record encoding error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid guild settings: {0}")]
    InvalidSettings(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Gateway error: {0}")]
    Gateway(String),
}
