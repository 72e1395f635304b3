//! Error types for hubsync.
//!
//! Every [`Error`] maps to an [`ErrorCode`]: a stable string for scripts,
//! an exit code per category (2 database, 3 not found, 4 validation,
//! 5 cycle, 6 remote, 7 config, 8 I/O) and a retryable flag. In JSON
//! mode the CLI prints [`Error::to_structured_json`] on stderr.

use std::path::PathBuf;
use thiserror::Error;

use crate::transport::ApiError;

/// Result type alias for hubsync operations.
pub type Result<T> = std::result::Result<T, Error>;

// ── Error Code ────────────────────────────────────────────────

/// Machine-readable error codes grouped by category.
///
/// Each code maps to a SCREAMING_SNAKE string and a category-based
/// exit code. Scripts match on the string or on the exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Database (exit 2)
    NotInitialized,
    AlreadyInitialized,
    DatabaseError,

    // Not Found (exit 3)
    IssueNotFound,
    NotLinked,
    RemoteNotFound,

    // Validation (exit 4)
    InvalidArgument,

    // Dependency (exit 5)
    CycleDetected,

    // Sync (exit 6)
    RemoteError,
    SyncIncomplete,

    // Config (exit 7)
    ConfigError,
    MissingCredential,

    // I/O (exit 8)
    IoError,
    JsonError,

    // Internal (exit 1)
    InternalError,
}

impl ErrorCode {
    /// Machine-readable SCREAMING_SNAKE code string.
    #[must_use]
    pub const fn as_str(&self) -> &str {
        match self {
            Self::NotInitialized => "NOT_INITIALIZED",
            Self::AlreadyInitialized => "ALREADY_INITIALIZED",
            Self::DatabaseError => "DATABASE_ERROR",
            Self::IssueNotFound => "ISSUE_NOT_FOUND",
            Self::NotLinked => "NOT_LINKED",
            Self::RemoteNotFound => "REMOTE_NOT_FOUND",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::CycleDetected => "CYCLE_DETECTED",
            Self::RemoteError => "REMOTE_ERROR",
            Self::SyncIncomplete => "SYNC_INCOMPLETE",
            Self::ConfigError => "CONFIG_ERROR",
            Self::MissingCredential => "MISSING_CREDENTIAL",
            Self::IoError => "IO_ERROR",
            Self::JsonError => "JSON_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Category-based exit code (1-8).
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::InternalError => 1,
            Self::NotInitialized | Self::AlreadyInitialized | Self::DatabaseError => 2,
            Self::IssueNotFound | Self::NotLinked | Self::RemoteNotFound => 3,
            Self::InvalidArgument => 4,
            Self::CycleDetected => 5,
            Self::RemoteError | Self::SyncIncomplete => 6,
            Self::ConfigError | Self::MissingCredential => 7,
            Self::IoError | Self::JsonError => 8,
        }
    }

    /// Whether re-running the same command may succeed.
    ///
    /// True for remote failures (rate limits, outages) and partial syncs.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RemoteError | Self::SyncIncomplete | Self::InvalidArgument
        )
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Error Enum ────────────────────────────────────────────────

/// Errors that can occur in hubsync operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Not initialized: run `hubsync init` first")]
    NotInitialized,

    #[error("Already initialized at {path}")]
    AlreadyInitialized { path: PathBuf },

    #[error("Issue not found: {id}")]
    IssueNotFound { id: String },

    #[error("Issue not found: {id} (did you mean: {}?)", similar.join(", "))]
    IssueNotFoundSimilar { id: String, similar: Vec<String> },

    #[error("Issue {id} is not linked to {service}")]
    NotLinked { id: String, service: String },

    #[error("Setting parent of {id} to {parent} would create a cycle")]
    CycleDetected { id: String, parent: String },

    #[error("Missing {service} credential: set {var}")]
    MissingCredential { service: String, var: String },

    #[error("{failed} of {total} issues failed to sync")]
    SyncIncomplete { failed: usize, total: usize },

    #[error("Remote API error: {0}")]
    Api(#[from] ApiError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Map this error to its structured `ErrorCode`.
    #[must_use]
    pub const fn error_code(&self) -> ErrorCode {
        match self {
            Self::NotInitialized => ErrorCode::NotInitialized,
            Self::AlreadyInitialized { .. } => ErrorCode::AlreadyInitialized,
            Self::Database(_) => ErrorCode::DatabaseError,
            Self::IssueNotFound { .. } | Self::IssueNotFoundSimilar { .. } => {
                ErrorCode::IssueNotFound
            }
            Self::NotLinked { .. } => ErrorCode::NotLinked,
            Self::Api(ApiError::NotFound { .. }) => ErrorCode::RemoteNotFound,
            Self::Api(_) => ErrorCode::RemoteError,
            Self::CycleDetected { .. } => ErrorCode::CycleDetected,
            Self::SyncIncomplete { .. } => ErrorCode::SyncIncomplete,
            Self::MissingCredential { .. } => ErrorCode::MissingCredential,
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::Config(_) => ErrorCode::ConfigError,
            Self::Io(_) => ErrorCode::IoError,
            Self::Json(_) => ErrorCode::JsonError,
            Self::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Category-based exit code, delegating to the `ErrorCode`.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        self.error_code().exit_code()
    }

    /// Context-aware recovery hint.
    ///
    /// Returns `None` if no actionable suggestion exists.
    #[must_use]
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::NotInitialized => {
                Some("Run `hubsync init` to initialize the database".to_string())
            }

            Self::AlreadyInitialized { path } => Some(format!(
                "Database already exists at {}. Use `--force` to reinitialize.",
                path.display()
            )),

            Self::IssueNotFound { id } => Some(format!(
                "No issue with ID '{id}'. Use `hubsync issue list` to see available issues."
            )),
            Self::IssueNotFoundSimilar { similar, .. } => {
                Some(format!("Did you mean: {}?", similar.join(", ")))
            }

            Self::NotLinked { id, .. } => Some(format!(
                "Run `hubsync sync push {id}` to create it remotely, or `hubsync sync link {id} <number>`."
            )),

            Self::MissingCredential { var, .. } => Some(format!(
                "Export {var} with an API token that can read and write issues."
            )),

            Self::SyncIncomplete { .. } => Some(
                "Re-run `hubsync sync push`; successful issues are recorded and will be skipped."
                    .to_string(),
            ),

            Self::Api(ApiError::RetriesExhausted { .. }) => Some(
                "The remote service kept failing. Wait a moment and try again.".to_string(),
            ),

            Self::Config(_) => Some(
                "Check ~/.hubsync/config.json or run `hubsync config show`.".to_string(),
            ),

            Self::InvalidArgument(msg) => [&crate::validate::STATUSES, &crate::validate::TYPES]
                .into_iter()
                .find(|vocabulary| msg.starts_with(&format!("Invalid {} ", vocabulary.kind())))
                .map(crate::validate::Vocabulary::listing),

            Self::CycleDetected { .. }
            | Self::Api(_)
            | Self::Database(_)
            | Self::Io(_)
            | Self::Json(_)
            | Self::Other(_) => None,
        }
    }

    /// Structured JSON representation for machine consumption.
    ///
    /// Includes error code, message, retryability, exit code, and
    /// optional recovery hint.
    #[must_use]
    pub fn to_structured_json(&self) -> serde_json::Value {
        let code = self.error_code();
        let mut obj = serde_json::json!({
            "error": {
                "code": code.as_str(),
                "message": self.to_string(),
                "retryable": code.is_retryable(),
                "exit_code": code.exit_code(),
            }
        });

        if let Some(hint) = self.hint() {
            obj["error"]["hint"] = serde_json::Value::String(hint);
        }

        obj
    }
}
