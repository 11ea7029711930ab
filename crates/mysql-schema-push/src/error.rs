//! Error types for the schema push library.

use std::time::Duration;

use thiserror::Error;

/// Exit code: run finished with no differences (or differences were applied).
pub const EXIT_SUCCESS: u8 = 0;
/// Exit code: `diff` found differences.
pub const EXIT_DIFFERENCES: u8 = 1;
/// Exit code: some targets or statements were skipped.
pub const EXIT_PARTIAL_ERROR: u8 = 2;
/// Exit code: configuration error.
pub const EXIT_CONFIG_ERROR: u8 = 3;
/// Exit code: database, workspace or other runtime error.
pub const EXIT_RUNTIME_ERROR: u8 = 4;
/// Exit code: file system error.
pub const EXIT_IO_ERROR: u8 = 7;
/// Exit code: interrupted by signal.
pub const EXIT_CANCELLED: u8 = 130;

/// Main error type for schema push operations.
#[derive(Error, Debug)]
pub enum PushError {
    /// Configuration error (invalid option value, malformed connect-options, bad wrapper template)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database connection or query error
    #[error("Database error: {0}")]
    Database(#[from] mysql_async::Error),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// Workspace provisioning or teardown failed
    #[error("Workspace error: {0}")]
    Workspace(String),

    /// Advisory lock could not be obtained in time
    #[error("Unable to obtain workspace lock on {instance} after {waited:?}")]
    LockTimeout { instance: String, waited: Duration },

    /// Statement is destructive and the active options forbid it
    #[error(
        "Preventing execution of unsafe or potentially destructive statement:\n{statement}\n\
         To allow this statement, re-run with {remediation}"
    )]
    ForbiddenDiff {
        statement: String,
        remediation: String,
    },

    /// The diff cannot express a change needed for this object
    #[error("Unable to generate DDL for {name}: {reason}")]
    UnsupportedDiff { name: String, reason: String },

    /// Replaying ALTERs in a workspace did not reach the expected definition
    #[error(
        "Diff verification failure on table {table}\n\n\
         EXPECTED POST-ALTER:\n{expected}\n\n\
         ACTUAL POST-ALTER:\n{actual}\n\n\
         Run command again with --skip-verify if this discrepancy is safe to ignore"
    )]
    Verification {
        table: String,
        expected: String,
        actual: String,
    },

    /// External wrapper command failed
    #[error("Wrapper command failed ({status}): {command}")]
    Wrapper { command: String, status: String },

    /// Broken assumption about the whole run; aborts every worker
    #[error("Fatal error: {0}")]
    Fatal(String),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid regular expression in an option value
    #[error("Invalid regular expression: {0}")]
    Regex(#[from] regex::Error),

    /// Run was cancelled (SIGINT, etc.)
    #[error("Push cancelled")]
    Cancelled,
}

impl PushError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl std::fmt::Display, context: impl Into<String>) -> Self {
        PushError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a Config error
    pub fn config(message: impl Into<String>) -> Self {
        PushError::Config(message.into())
    }

    /// Create a Workspace error
    pub fn workspace(message: impl Into<String>) -> Self {
        PushError::Workspace(message.into())
    }

    /// True if the error means the object could not be expressed as DDL.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, PushError::UnsupportedDiff { .. })
    }

    /// True if the error should abort the entire run rather than one target.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PushError::Fatal(_))
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            PushError::Config(_)
            | PushError::Yaml(_)
            | PushError::Regex(_)
            | PushError::ForbiddenDiff { .. } => EXIT_CONFIG_ERROR,
            PushError::Io(_) => EXIT_IO_ERROR,
            PushError::Cancelled => EXIT_CANCELLED,
            _ => EXIT_RUNTIME_ERROR,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for schema push operations.
pub type Result<T> = std::result::Result<T, PushError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(PushError::config("bad").exit_code(), EXIT_CONFIG_ERROR);
        assert_eq!(PushError::Cancelled.exit_code(), EXIT_CANCELLED);
        assert_eq!(
            PushError::workspace("container gone").exit_code(),
            EXIT_RUNTIME_ERROR
        );
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        assert_eq!(PushError::from(io).exit_code(), EXIT_IO_ERROR);
    }

    #[test]
    fn test_lock_timeout_message_names_instance_and_wait() {
        let err = PushError::LockTimeout {
            instance: "db1:3306".to_string(),
            waited: Duration::from_secs(30),
        };
        let msg = err.to_string();
        assert!(msg.contains("db1:3306"));
        assert!(msg.contains("30s"));
    }

    #[test]
    fn test_verification_message_suggests_skip_verify() {
        let err = PushError::Verification {
            table: "orders".to_string(),
            expected: "CREATE TABLE `orders` (a)".to_string(),
            actual: "CREATE TABLE `orders` (b)".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("orders"));
        assert!(msg.contains("--skip-verify"));
        assert!(msg.contains("(a)") && msg.contains("(b)"));
    }

    #[test]
    fn test_only_fatal_is_fatal() {
        assert!(PushError::Fatal("bad workspace kind".into()).is_fatal());
        assert!(!PushError::config("x").is_fatal());
        assert!(PushError::UnsupportedDiff {
            name: "t".into(),
            reason: "r".into()
        }
        .is_unsupported());
    }
}
