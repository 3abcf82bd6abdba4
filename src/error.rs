//! Error types for `craftwatch`.
//!
//! Transient failures of the two observation sources and the notification
//! channel each get their own enum so the monitor loop can log them with
//! the right context and hold state instead of crashing. Only
//! [`ConfigError`] is fatal, and only at startup.

use std::time::Duration;

use thiserror::Error;

// ============================================================================
// Exit Codes
// ============================================================================

/// Exit codes for `craftwatch` CLI operations.
///
/// These codes follow Unix conventions.
pub struct ExitCode;

impl ExitCode {
    /// Successful execution
    pub const SUCCESS: i32 = 0;

    /// General error
    pub const ERROR: i32 = 1;

    /// Configuration error (invalid YAML, validation failure)
    pub const CONFIG_ERROR: i32 = 2;

    /// I/O error (file not found, permission denied)
    pub const IO_ERROR: i32 = 3;

    /// Freshness-source error (SFTP connect/stat/read failure)
    pub const PROBE_ERROR: i32 = 4;

    /// Roster-query error (RCON connect/auth/parse failure)
    pub const QUERY_ERROR: i32 = 5;

    /// Notification-channel error (Discord REST failure)
    pub const NOTIFY_ERROR: i32 = 6;

    /// Usage error (invalid arguments, missing required options)
    pub const USAGE_ERROR: i32 = 64;

    /// Interrupted by SIGINT (Ctrl+C)
    pub const INTERRUPTED: i32 = 130;

    /// Terminated by SIGTERM
    pub const TERMINATED: i32 = 143;
}

// ============================================================================
// Top-Level Error
// ============================================================================

/// Top-level error type for `craftwatch` operations.
///
/// Aggregates the domain-specific errors and maps each to an exit code.
/// Inside the monitor loop none of these are fatal; this type only
/// surfaces from startup and from the one-shot `check` command.
#[derive(Debug, Error)]
pub enum CraftwatchError {
    /// Configuration loading or validation error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Freshness-source transport error
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Roster-query error
    #[error(transparent)]
    Query(#[from] QueryError),

    /// Notification-channel error
    #[error(transparent)]
    Notify(#[from] NotifyError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CraftwatchError {
    /// Returns the appropriate exit code for this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => ExitCode::CONFIG_ERROR,
            Self::Connection(_) => ExitCode::PROBE_ERROR,
            Self::Query(_) => ExitCode::QUERY_ERROR,
            Self::Notify(_) => ExitCode::NOTIFY_ERROR,
            Self::Io(_) => ExitCode::IO_ERROR,
        }
    }
}

// ============================================================================
// Configuration Errors
// ============================================================================

/// Configuration loading and validation errors.
///
/// All of these are fatal at startup and never occur in steady-state
/// operation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file could not be read
    #[error("cannot read {path}: {source}")]
    Io {
        /// Path to the configuration file
        path: String,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// YAML parsing failed
    #[error("parse error in {path}: {message}")]
    Parse {
        /// Path to the configuration file
        path: String,
        /// Error message from the parser
        message: String,
    },

    /// Environment variable referenced in configuration is not set
    #[error("environment variable '{var}' not set (referenced in configuration)")]
    EnvVarNotSet {
        /// Name of the environment variable
        var: String,
    },

    /// Required field is missing or empty
    #[error("missing required field '{field}'")]
    MissingRequired {
        /// Dotted path of the missing field
        field: String,
    },

    /// Field has an invalid value
    #[error("invalid value for '{field}': got '{value}', expected {expected}")]
    InvalidValue {
        /// Dotted path of the field
        field: String,
        /// The actual value provided
        value: String,
        /// Description of what was expected
        expected: String,
    },
}

// ============================================================================
// Freshness-Source Errors
// ============================================================================

/// Transport-level failures of the freshness source.
///
/// All transient: the probe throttles reconnection and the engine holds
/// its current state; a connection error never causes a status transition
/// by itself.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// TCP-level failure reaching the SFTP host
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// SSH handshake, authentication, or SFTP operation failure
    #[error("SSH error: {0}")]
    Ssh(#[from] ssh2::Error),

    /// Host name did not resolve to any address
    #[error("cannot resolve '{host}'")]
    AddressResolution {
        /// The configured host
        host: String,
    },

    /// Reconnect cooldown has not elapsed; no I/O was attempted
    #[error("reconnect throttled for another {retry_in:.0?}")]
    Throttled {
        /// Time remaining until the next connection attempt is allowed
        retry_in: Duration,
    },

    /// The blocking probe task was cancelled or panicked
    #[error("probe task failed: {0}")]
    TaskFailed(String),
}

// ============================================================================
// Roster-Query Errors
// ============================================================================

/// Failures of the roster query exchange.
///
/// All transient and handled by the fallback branches of the transition
/// table. A malformed reply is deliberately indistinguishable from an
/// unreachable server: the parser fails closed rather than guessing a
/// partial roster.
#[derive(Debug, Error)]
pub enum QueryError {
    /// TCP-level failure reaching the RCON port
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The exchange did not complete within the configured timeout
    #[error("query timed out after {timeout:?}")]
    Timeout {
        /// The configured per-call timeout
        timeout: Duration,
    },

    /// The server rejected the RCON password
    #[error("authentication rejected")]
    AuthRejected,

    /// The server closed the connection mid-exchange
    #[error("connection closed before reply")]
    ConnectionClosed,

    /// The reply did not match the expected player-list shape
    #[error("malformed reply: {0:?}")]
    MalformedResponse(String),
}

// ============================================================================
// Notification Errors
// ============================================================================

/// Failures posting to the notification channel.
///
/// Logged by the notifier task and dropped; a flaky channel never stops
/// the monitor loop.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// HTTP transport failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success HTTP status from the channel API
    #[error("unexpected HTTP status {code} from {endpoint}")]
    Status {
        /// The HTTP status code
        code: u16,
        /// The endpoint that returned it
        endpoint: String,
    },

    /// Response body did not match the expected shape
    #[error("unexpected payload: {0}")]
    UnexpectedPayload(String),
}

// ============================================================================
// Result Type Alias
// ============================================================================

/// Result type alias for `craftwatch` operations.
pub type Result<T> = std::result::Result<T, CraftwatchError>;

// ============================================================================
// Tests
// ============================================================================
