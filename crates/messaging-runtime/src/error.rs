//! Error types for queue operations.

use crate::capabilities::QueueOperation;
use std::fmt;
use thiserror::Error;

/// Comprehensive error type for all queue operations
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue '{queue}' is not opened")]
    NotOpened {
        queue: String,
        trace_id: Option<String>,
    },

    #[error("Operation '{operation}' is not supported by queue '{queue}'")]
    Unsupported {
        queue: String,
        operation: QueueOperation,
    },

    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Transport error ({transport}): {message}")]
    TransportError { transport: String, message: String },

    #[error("Serialization failed: {0}")]
    Serialization(#[from] SerializationError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
}

impl QueueError {
    /// Broad class of the failure, shared by every queue implementation
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NotOpened { .. } => ErrorCategory::InvalidState,
            Self::Unsupported { .. } => ErrorCategory::Unsupported,
            Self::ConnectionFailed { .. } => ErrorCategory::Connection,
            Self::TransportError { .. } => ErrorCategory::Invocation,
            Self::Serialization(_) => ErrorCategory::BadRequest,
            Self::Configuration(_) => ErrorCategory::Configuration,
        }
    }

    /// Stable machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotOpened { .. } => "NOT_OPENED",
            Self::Unsupported { .. } => "UNSUPPORTED",
            Self::ConnectionFailed { .. } => "CONNECTION_FAILED",
            Self::TransportError { .. } => "TRANSPORT_ERROR",
            Self::Serialization(_) => "SERIALIZATION_FAILED",
            Self::Configuration(_) => "CONFIGURATION_ERROR",
        }
    }

    /// Trace id of the operation that failed, when one was known
    pub fn trace_id(&self) -> Option<&str> {
        match self {
            Self::NotOpened { trace_id, .. } => trace_id.as_deref(),
            _ => None,
        }
    }

    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::NotOpened { .. } => false,
            Self::Unsupported { .. } => false,
            Self::ConnectionFailed { .. } => true,
            Self::TransportError { .. } => true,
            Self::Serialization(_) => false,
            Self::Configuration(_) => false,
        }
    }
}

/// Error classes of the application error taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Operation invoked while the component is in the wrong state
    InvalidState,
    /// Operation not supported by the backend
    Unsupported,
    /// Connection to the backend could not be established
    Connection,
    /// Backend call failed
    Invocation,
    /// Malformed input data
    BadRequest,
    /// Invalid or missing configuration
    Configuration,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InvalidState => "InvalidState",
            Self::Unsupported => "Unsupported",
            Self::Connection => "Connection",
            Self::Invocation => "Invocation",
            Self::BadRequest => "BadRequest",
            Self::Configuration => "Configuration",
        };
        f.write_str(name)
    }
}

/// Errors during message serialization/deserialization
#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("JSON serialization failed: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Envelope has no message payload")]
    MissingPayload,
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required configuration: {key}")]
    Missing { key: String },

    #[error("Configuration parsing failed: {message}")]
    Parsing { message: String },
}

impl From<config::ConfigError> for ConfigurationError {
    fn from(err: config::ConfigError) -> Self {
        Self::Parsing {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
