//! Error types for `questline`.
//!
//! Expected quest outcomes (phase closed, timer not yet satisfied, wrong
//! answer, no skips left) are ordinary values and never appear here. This
//! module only carries caller faults, invariant violations, storage
//! failures and the configuration/CLI errors around them.

use std::path::PathBuf;

use thiserror::Error;

use crate::quest::gate::CompetitionPhase;
use crate::quest::progress::TeamId;

// ============================================================================
// Exit Codes
// ============================================================================

/// Process exit codes for the `questline` binary.
pub struct ExitCode;

impl ExitCode {
    /// Successful execution
    pub const SUCCESS: i32 = 0;

    /// General error
    pub const ERROR: i32 = 1;

    /// Configuration error (invalid YAML, validation failure)
    pub const CONFIG_ERROR: i32 = 2;

    /// I/O error (file not found, permission denied, bind failure)
    pub const IO_ERROR: i32 = 3;

    /// Progression storage error (unreadable or corrupted state directory)
    pub const STORE_ERROR: i32 = 4;

    /// Progression engine error (invariant violation, phase regression)
    pub const PROGRESSION_ERROR: i32 = 5;

    /// Usage error (invalid arguments)
    pub const USAGE_ERROR: i32 = 64;

    /// Interrupted by SIGINT (Ctrl+C)
    pub const INTERRUPTED: i32 = 130;

    /// Terminated by SIGTERM
    pub const TERMINATED: i32 = 143;
}

// ============================================================================
// Top-Level Error
// ============================================================================

/// Top-level error type for `questline` operations.
#[derive(Debug, Error)]
pub enum QuestlineError {
    /// Configuration loading or validation error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Progression engine error
    #[error(transparent)]
    Progression(#[from] ProgressionError),

    /// Administrative phase control error
    #[error(transparent)]
    Phase(#[from] PhaseError),

    /// Progress persistence error
    #[error(transparent)]
    Store(#[from] StoreError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl QuestlineError {
    /// Returns the exit code for this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Json(_) => ExitCode::CONFIG_ERROR,
            Self::Progression(_) | Self::Phase(_) => ExitCode::PROGRESSION_ERROR,
            Self::Store(_) => ExitCode::STORE_ERROR,
            Self::Io(_) => ExitCode::IO_ERROR,
        }
    }
}

// ============================================================================
// Configuration Errors
// ============================================================================

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// YAML parsing failed
    #[error("parse error in {path}: {message}")]
    ParseError {
        /// Path to the configuration file
        path: PathBuf,
        /// Line number where the error occurred (if available)
        line: Option<usize>,
        /// Error message from the parser
        message: String,
    },

    /// Configuration validation failed
    #[error("validation failed for {path}: {}", summarize(errors))]
    ValidationError {
        /// Path to the configuration file
        path: String,
        /// Every validation issue found
        errors: Vec<ValidationIssue>,
    },

    /// Configuration file not found or unreadable
    #[error("file not found: {path}")]
    MissingFile {
        /// Path to the missing file
        path: PathBuf,
    },

    /// Field has an invalid value
    #[error("invalid value for '{field}': got '{value}', expected {expected}")]
    InvalidValue {
        /// Name of the field with invalid value
        field: String,
        /// The actual value provided
        value: String,
        /// Description of what was expected
        expected: String,
    },

    /// Environment variable referenced with `${VAR:?msg}` is not set
    #[error("environment variable '{var}' not set ({location})")]
    EnvVarNotSet {
        /// Name of the environment variable
        var: String,
        /// Message or location attached to the reference
        location: String,
    },
}

fn summarize(errors: &[ValidationIssue]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

// ============================================================================
// Validation Types
// ============================================================================

/// A single validation issue found during configuration validation.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Path to the problematic field (e.g. `variants.pilot.tasks[2].dwell`)
    pub path: String,
    /// Description of the validation issue
    pub message: String,
    /// Severity level of the issue
    pub severity: Severity,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{}: {} at {}", prefix, self.message, self.path)
    }
}

/// Severity level for validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Prevents the configuration from being used
    Error,
    /// Reported, but the configuration still loads
    Warning,
}

// ============================================================================
// Phase Control Errors
// ============================================================================

/// Errors raised by administrative phase control.
#[derive(Debug, Error)]
pub enum PhaseError {
    /// Competition phases only move forward
    #[error("phase cannot move back from {from} to {to}")]
    Regression {
        /// Phase in effect when the change was requested
        from: CompetitionPhase,
        /// Requested phase
        to: CompetitionPhase,
    },

    /// Phase name could not be parsed
    #[error("unknown phase '{0}' (expected not_started, pilot, final or finished)")]
    Unknown(String),
}

// ============================================================================
// Progression Errors
// ============================================================================

/// Failures of a progression operation.
///
/// Caller faults are detected before a team's exclusive section is entered.
/// Invariant violations mean the stored record is corrupted; the operation
/// is refused instead of guessing a safe value.
#[derive(Debug, Error)]
pub enum ProgressionError {
    /// Requester is not a member of any team
    #[error("user '{0}' does not belong to any team")]
    UnknownRequester(String),

    /// Requester belongs to a team but is not its leader
    #[error("user '{user}' is not the leader of team '{team}'")]
    NotLeader {
        /// Requesting user
        user: String,
        /// Team the user belongs to
        team: TeamId,
    },

    /// Submitted answer is empty, too long or contains control characters
    #[error("malformed answer: {0}")]
    MalformedAnswer(String),

    /// Stored progress contradicts the catalog or its own invariants
    #[error(transparent)]
    Invariant(#[from] InvariantViolation),

    /// Progress could not be loaded
    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl ProgressionError {
    /// Returns `true` for faults caused by the request itself.
    #[must_use]
    pub const fn is_caller_fault(&self) -> bool {
        matches!(
            self,
            Self::UnknownRequester(_) | Self::NotLeader { .. } | Self::MalformedAnswer(_)
        )
    }

    /// Short label used for metrics and logs.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::UnknownRequester(_) => "unknown_requester",
            Self::NotLeader { .. } => "not_leader",
            Self::MalformedAnswer(_) => "malformed_answer",
            Self::Invariant(_) => "invariant",
            Self::Storage(_) => "storage",
        }
    }
}

/// A corrupted progress record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    /// Current index lies outside `[-1, catalog length]`
    #[error("team '{team}': task index {index} outside catalog of {len} tasks")]
    IndexOutOfBounds {
        /// Affected team
        team: TeamId,
        /// Stored index
        index: i64,
        /// Catalog length
        len: usize,
    },

    /// An active task has no start timestamp
    #[error("team '{team}': task {index} is active but has no start time")]
    MissingStartTime {
        /// Affected team
        team: TeamId,
        /// Active task index
        index: usize,
    },

    /// Completed flag disagrees with the stored index
    #[error("team '{team}': completed={completed} contradicts task index {index}")]
    CompletionMismatch {
        /// Affected team
        team: TeamId,
        /// Stored index
        index: i64,
        /// Stored completed flag
        completed: bool,
    },

    /// More skips recorded than the configured budget allows
    #[error("team '{team}': {used} skips recorded but only {max} allowed")]
    SkipBudgetExceeded {
        /// Affected team
        team: TeamId,
        /// Recorded skips
        used: u32,
        /// Configured limit
        max: u32,
    },
}

// ============================================================================
// Storage Errors
// ============================================================================

/// Progress persistence errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading or writing a progress file failed
    #[error("progress I/O error at {path}: {source}")]
    Io {
        /// File or directory involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// A progress file could not be decoded
    #[error("corrupted progress file {path}: {message}")]
    Corrupt {
        /// Offending file
        path: PathBuf,
        /// Decoder message
        message: String,
    },

    /// Team identifier cannot be used as a storage key
    #[error("team id '{0}' cannot be used as a storage key")]
    InvalidKey(String),
}

// ============================================================================
// Result Type Alias
// ============================================================================

/// Result type alias for `questline` operations.
pub type Result<T> = std::result::Result<T, QuestlineError>;

// ============================================================================
// Tests
// ============================================================================
