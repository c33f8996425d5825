//! Error Handling Guidelines
//!
//! All error messages should follow this format:
//!
//! 1. **What failed**: Describe the operation that failed
//! 2. **Why it failed**: Provide the root cause if known
//! 3. **What to do**: Suggest user action when possible
//!
//! Examples:
//! - ✅ "Cannot open device: port busy. Close other programs using it and rescan."
//! - ✅ "Permission denied for FT232R - replug the device to be asked again."
//! - ❌ "Open failed" (lacks context and action)
//! - ❌ "Error" (too vague)

use device_types::TransportError;
use thiserror::Error;

/// Unified error type for session actor operations
#[derive(Error, Debug, Clone)]
pub enum SessionError {
    /// State transition was rejected
    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),

    /// Actor received an unexpected message in current state
    #[error("Unexpected message in state {state}: {message}")]
    UnexpectedMessage { state: String, message: String },

    /// Communication channel closed
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// Timeout waiting for a completion
    #[error("Operation timeout: {0}")]
    Timeout(String),

    /// Transport layer error
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Device not found or no driver claims it
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<String> for SessionError {
    fn from(s: String) -> Self {
        SessionError::Other(s)
    }
}

impl From<&str> for SessionError {
    fn from(s: &str) -> Self {
        SessionError::Other(s.to_string())
    }
}
