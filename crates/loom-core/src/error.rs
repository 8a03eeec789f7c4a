//! Error taxonomy for the engine
//!
//! Tool and command failures are turned into data (an error-bearing
//! `ToolOut` or message). Only `StorageError` aborts a turn outright.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Persistence failure in the conversation store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error while {operation}: {source}")]
    Database {
        operation: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("conversation '{0}' not found")]
    ConversationNotFound(String),

    #[error(
        "sequence gap in conversation '{conversation_id}': expected {expected}, found {found}"
    )]
    SequenceGap {
        conversation_id: String,
        expected: i64,
        found: i64,
    },

    #[error("failed to encode {field} for storage: {source}")]
    Encode {
        field: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to decode {field} of message {message_id}: {source}")]
    Decode {
        field: &'static str,
        message_id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("I/O error while {operation} at {}: {source}", .path.display())]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("storage worker failed: {0}")]
    Worker(String),
}

impl StorageError {
    #[must_use]
    pub fn db(operation: &'static str, source: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(ffi, message) = &source {
            if ffi.code == rusqlite::ErrorCode::ConstraintViolation {
                let detail = message
                    .clone()
                    .unwrap_or_else(|| "constraint failed".to_string());
                return Self::ConstraintViolation(format!("{operation}: {detail}"));
            }
        }
        Self::Database { operation, source }
    }
}

/// Startup-time registry misconfiguration or a failed lookup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("tool '{0}' is registered more than once")]
    DuplicateTool(String),

    #[error("tool '{name}' declares an invalid input schema: {reason}")]
    InvalidSchema { name: String, reason: String },

    #[error("unknown tool: {0}")]
    NotFound(String),
}

/// Tool input rejected by the declared schema. `run` is never invoked.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid input for tool '{tool}': {}", .errors.join("; "))]
pub struct ValidationError {
    pub tool: String,
    pub errors: Vec<String>,
}

/// Exit status of a finished external command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatusInfo {
    Code(i32),
    Signal(i32),
}

impl std::fmt::Display for ExitStatusInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Code(code) => write!(f, "exit code {code}"),
            Self::Signal(signal) => write!(f, "signal {signal}"),
        }
    }
}

/// External command failure. Every variant that ran the process carries the
/// output captured up to the point of failure.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("{} is not executable", .path.display())]
    NotExecutable { path: PathBuf },

    #[error("command timed out after {}s", .timeout.as_secs_f64())]
    Timeout { timeout: Duration, output: String },

    #[error("command failed with {status}")]
    NonZeroExit {
        status: ExitStatusInfo,
        output: String,
    },

    #[error("command cancelled")]
    Cancelled { output: String },

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error while {operation}: {source}")]
    Io {
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl CommandError {
    /// Output captured before the failure, if the process ran at all.
    pub fn output(&self) -> Option<&str> {
        match self {
            Self::Timeout { output, .. }
            | Self::NonZeroExit { output, .. }
            | Self::Cancelled { output } => Some(output),
            Self::NotExecutable { .. } | Self::Spawn { .. } | Self::Io { .. } => None,
        }
    }

    /// Short machine-readable code used in tool error envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotExecutable { .. } => "not_executable",
            Self::Timeout { .. } => "timeout",
            Self::NonZeroExit { .. } => "command_failed",
            Self::Cancelled { .. } => "cancelled",
            Self::Spawn { .. } => "spawn_failed",
            Self::Io { .. } => "io_error",
        }
    }
}

/// Model provider failure as seen by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("network error: {0}")]
    Network(String),

    #[error("rate limited{}", .retry_after.map(|d| format!(" (retry after {}ms)", d.as_millis())).unwrap_or_default())]
    RateLimited { retry_after: Option<Duration> },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("model call timed out after {}s", .0.as_secs())]
    Timeout(Duration),
}

/// Failure that ends a turn without a final answer.
#[derive(Debug, Error)]
pub enum TurnError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("model failed after {attempts} attempt(s): {source}")]
    Model {
        attempts: u32,
        #[source]
        source: ModelError,
    },

    #[error("a turn is already running for conversation '{0}'")]
    TurnInProgress(String),
}

/// Configuration file could not be read or parsed.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}
