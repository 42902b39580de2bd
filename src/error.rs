//! Unified error types for Grind.
//!
//! Check failures are never errors: they are the normal input of the
//! escalation controller. Errors here cover the controller's own
//! bookkeeping (state store I/O), malformed hook input, and configuration.
//! Only configuration loading is fail-open; a state store fault must
//! surface to the caller because the controller cannot decide without the
//! prior iteration count.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for Grind operations.
#[derive(Error, Debug)]
pub enum GrindError {
    /// I/O errors from state or config file operations.
    #[error("storage error at {path}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// JSON or TOML parsing/serialization errors.
    #[error("serialization error: {message}")]
    Serde { message: String },

    /// Configuration loading or validation errors.
    #[error("config error: {message}")]
    Config { message: String },

    /// Caller-supplied input that cannot be evaluated.
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    /// Persisted state that violates the controller's invariants.
    #[error("invalid state: {message}")]
    InvalidState { message: String },
}

/// A specialized Result type for Grind operations.
pub type Result<T> = std::result::Result<T, GrindError>;

impl GrindError {
    /// Create a storage error from an I/O error.
    pub fn storage(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }

    /// Create a serialization error.
    pub fn serde(message: impl Into<String>) -> Self {
        Self::Serde {
            message: message.into(),
        }
    }

    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create an invalid state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Whether this error came from the controller's own bookkeeping.
    ///
    /// Hosts must not treat such a cycle as evaluated; they should retry or
    /// report the fault to the Supervisor directly.
    pub fn is_bookkeeping_fault(&self) -> bool {
        matches!(self, Self::Storage { .. } | Self::InvalidState { .. })
    }
}

impl From<io::Error> for GrindError {
    fn from(err: io::Error) -> Self {
        Self::Storage {
            path: PathBuf::new(),
            source: err,
        }
    }
}

impl From<serde_json::Error> for GrindError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serde {
            message: err.to_string(),
        }
    }
}

/// Fail-open handling for configuration layers.
///
/// A broken config layer is logged and skipped. Never use this on state
/// store results.
pub trait FailOpen<T> {
    /// Log a warning and return the provided fallback on error.
    fn fail_open_with(self, context: &str, fallback: T) -> T;
}

impl<T> FailOpen<T> for Result<T> {
    fn fail_open_with(self, context: &str, fallback: T) -> T {
        match self {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!("{}: {} (fail-open: using fallback)", context, err);
                fallback
            }
        }
    }
}

/// Exit codes for the `grind` binary.
///
/// Hosting tools branch on these to route a decision to the right agent.
pub mod exit_codes {
    /// All checks passed; nothing to relay.
    pub const CONTINUE: i32 = 0;

    /// The cycle could not be evaluated (state store or input fault).
    pub const ERROR: i32 = 1;

    /// Feed the message and payload back to the Worker.
    pub const RETRY: i32 = 2;

    /// The process panicked.
    pub const CRASH: i32 = 3;

    /// Forward the message and payload to the Supervisor.
    pub const ESCALATE: i32 = 4;
}
