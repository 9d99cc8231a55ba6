//! Error types for voice monitoring

use thiserror::Error;

/// Result type alias for voice operations
pub type VoiceResult<T> = Result<T, VoiceError>;

/// Errors raised by voice connections and audio subscriptions
#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("Audio subscription error: {0}")]
    Subscription(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
