//! CLI error types for structured error handling.
//!
//! This module provides typed errors that map to specific exit codes,
//! enabling consistent error handling across the CLI.

use std::fmt;

use fullbackup_core::BackupError;

/// CLI-specific errors with associated exit codes.
#[derive(Debug)]
pub enum CliError {
    /// Resource not found (config, database, backup file)
    NotFound { message: String, hint: String },

    /// Authentication failed (wrong passphrase)
    AuthFailed {
        message: String,
        hint: Option<String>,
    },

    /// Invalid user input
    InvalidInput(String),

    /// The backup is damaged, or restoring it would break the database
    IntegrityFailed { message: String, hint: String },
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::NotFound { message, hint } | CliError::IntegrityFailed { message, hint } => {
                write!(f, "{}\n{}", message, hint)
            }
            CliError::AuthFailed { message, hint } => {
                if let Some(h) = hint {
                    write!(f, "{}\n{}", message, h)
                } else {
                    write!(f, "{}", message)
                }
            }
            CliError::InvalidInput(message) => write!(f, "{}", message),
        }
    }
}

impl std::error::Error for CliError {}

impl CliError {
    /// Create a NotFound error with message and hint.
    pub fn not_found(message: impl Into<String>, hint: impl Into<String>) -> Self {
        CliError::NotFound {
            message: message.into(),
            hint: hint.into(),
        }
    }

    /// Create an AuthFailed error with message and hint.
    pub fn auth_failed_with_hint(message: impl Into<String>, hint: impl Into<String>) -> Self {
        CliError::AuthFailed {
            message: message.into(),
            hint: Some(hint.into()),
        }
    }

    /// Create an InvalidInput error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        CliError::InvalidInput(message.into())
    }

    pub fn integrity_failed(message: impl Into<String>, hint: impl Into<String>) -> Self {
        CliError::IntegrityFailed {
            message: message.into(),
            hint: hint.into(),
        }
    }

    /// Get the exit code for this error.
    pub fn exit_code(&self) -> i32 {
        use super::constants::exit_codes;
        match self {
            CliError::NotFound { .. } => exit_codes::NOT_FOUND,
            CliError::AuthFailed { .. } => exit_codes::AUTH_FAILED,
            CliError::InvalidInput(_) => exit_codes::INVALID_INPUT,
            CliError::IntegrityFailed { .. } => exit_codes::INTEGRITY_FAILED,
        }
    }

    /// Print error message to stderr and exit with appropriate code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);
        std::process::exit(self.exit_code())
    }
}

/// Turn a core error into one that carries the right exit code.
///
/// Errors without a dedicated exit code pass through unchanged.
pub fn from_backup_error(err: BackupError) -> anyhow::Error {
    let message = err.to_string();
    let classified = match err {
        BackupError::BadMac => CliError::auth_failed_with_hint(
            message,
            "Check the passphrase. If it is correct, the backup file is corrupted.",
        ),
        BackupError::Truncated
        | BackupError::MalformedFrame(_)
        | BackupError::SizeMismatch { .. } => CliError::integrity_failed(
            message,
            "The backup is incomplete or damaged. Nothing was restored.",
        ),
        BackupError::ForeignKeyViolation(_) | BackupError::ConstraintViolation { .. } => {
            CliError::integrity_failed(
                message,
                "The backup does not fit together. The database was left unchanged.",
            )
        }
        BackupError::UnsupportedVersion(_)
        | BackupError::DatabaseDowngrade { .. }
        | BackupError::InvalidInput(_) => CliError::invalid_input(message),
        other => return other.into(),
    };
    classified.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::exit_codes;

    fn exit_code_of(err: BackupError) -> Option<i32> {
        from_backup_error(err)
            .downcast_ref::<CliError>()
            .map(CliError::exit_code)
    }

    #[test]
    fn test_backup_errors_map_to_exit_codes() {
        assert_eq!(exit_code_of(BackupError::BadMac), Some(exit_codes::AUTH_FAILED));
        assert_eq!(
            exit_code_of(BackupError::Truncated),
            Some(exit_codes::INTEGRITY_FAILED)
        );
        assert_eq!(
            exit_code_of(BackupError::DatabaseDowngrade {
                current: 1,
                backup: 2
            }),
            Some(exit_codes::INVALID_INPUT)
        );
    }

    #[test]
    fn test_unclassified_errors_pass_through() {
        let err = from_backup_error(BackupError::Storage("disk full".to_string()));
        assert!(err.downcast_ref::<CliError>().is_none());
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn test_display_includes_hint() {
        let err = CliError::not_found("No backup at x", "Check the path");
        assert_eq!(err.to_string(), "No backup at x\nCheck the path");
        assert_eq!(err.exit_code(), exit_codes::NOT_FOUND);
    }
}
