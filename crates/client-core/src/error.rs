//! Error types for the client-core library
//!
//! Errors fall into two broad families. User command errors (bad arguments,
//! unknown stream kinds, no active session) are reported to the operator as
//! text and never terminate anything. Everything else is an operational
//! failure surfaced at the boundary nearest its trigger.

use thiserror::Error;

/// Result type for client-core operations
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur in the orchestration layer
#[derive(Debug, Error)]
pub enum ClientError {
    /// User command error: invalid arguments, unknown words, bad input
    #[error("{message}")]
    Command { message: String },

    /// A chat operation was attempted on a session without a chat stream
    #[error("No chat stream on this session. Try :add chat")]
    NoChatStream,

    /// A session-scoped command was issued with no current session
    #[error("No active session")]
    NoActiveSession,

    /// The signaling engine rejected or failed a command
    #[error("Engine error: {message}")]
    Engine { message: String },

    /// A bounded operation exceeded its deadline
    #[error("Timed out after {seconds} seconds while {operation}")]
    Timeout { operation: String, seconds: u64 },

    /// Filesystem failure (history logs, file transfers)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or unusable configuration
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ClientError {
    /// Create a user command error
    pub fn command(message: impl Into<String>) -> Self {
        Self::Command {
            message: message.into(),
        }
    }

    /// Create an engine error
    pub fn engine(message: impl Into<String>) -> Self {
        Self::Engine {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, seconds: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            seconds,
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether this error should be shown to the operator and otherwise ignored
    ///
    /// User errors never abort anything; the command is simply not executed.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::Command { .. } | Self::NoChatStream | Self::NoActiveSession
        )
    }
}
