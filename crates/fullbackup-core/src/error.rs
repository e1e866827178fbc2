//! Error types for backup export, import and verification.
//!
//! Errors are descriptive at the core level; the CLI layer maps these
//! to user-friendly messages and exit codes.

use thiserror::Error;

/// Result type alias for backup operations.
pub type Result<T> = std::result::Result<T, BackupError>;

/// A single row reported by `PRAGMA foreign_key_check`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyViolation {
    /// Table holding the offending row
    pub table: String,
    /// Child column(s) of the violated constraint
    pub column: String,
    /// Rowid of the offending row, if the table has one
    pub row_id: Option<i64>,
    /// Referenced (parent) table
    pub parent: String,
}

impl std::fmt::Display for ForeignKeyViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{} -> {}", self.table, self.column, self.parent)?;
        if let Some(row_id) = self.row_id {
            write!(f, " (row {})", row_id)?;
        }
        Ok(())
    }
}

fn format_violations(violations: &[ForeignKeyViolation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Core error type for backup operations.
#[derive(Debug, Error)]
pub enum BackupError {
    /// Cryptographic primitive failure (should never happen on a conformant platform)
    #[error("Encryption error: {0}")]
    Crypto(String),

    /// A frame failed MAC verification; the whole backup is untrusted
    #[error("Bad MAC on backup frame (wrong passphrase or corrupted backup)")]
    BadMac,

    /// A blob trailer failed MAC verification; only that blob is lost
    #[error("Bad MAC on blob stream")]
    BlobBadMac,

    /// Frame bytes could not be decoded or declared an invalid length
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// The stream ended before a frame or blob was complete
    #[error("Unexpected end of backup stream")]
    Truncated,

    /// A blob produced a different number of bytes than its frame declared
    #[error("Size mismatch: declared {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    /// Backup header declares a container format this build cannot read
    #[error("Unsupported backup format version: {0}")]
    UnsupportedVersion(u32),

    /// Backup was taken from a newer database schema than the target
    #[error("Backup database version {backup} is newer than the current version {current}")]
    DatabaseDowngrade { current: i64, backup: i64 },

    /// Referential integrity check failed before commit
    #[error("Foreign key violations: {}", format_violations(.0))]
    ForeignKeyViolation(Vec<ForeignKeyViolation>),

    /// A replayed statement violated a table constraint
    #[error("Constraint violation while importing into table {table}: {source}")]
    ConstraintViolation {
        table: String,
        #[source]
        source: rusqlite::Error,
    },

    /// The caller requested cancellation
    #[error("Backup cancelled")]
    Cancelled,

    /// Schema introspection or ordering error
    #[error("Schema error: {0}")]
    Schema(String),

    /// Blob, avatar or preference storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Invalid user input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// SQLite-specific error
    #[error("SQLite error: {source}")]
    Sqlite {
        #[from]
        source: rusqlite::Error,
    },

    /// I/O error
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error
    #[error("JSON error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
}

impl BackupError {
    /// Whether this error is the caller's own cancellation rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, BackupError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_foreign_key_violation_message_lists_every_violation() {
        let err = BackupError::ForeignKeyViolation(vec![
            ForeignKeyViolation {
                table: "reaction".to_string(),
                column: "message_id".to_string(),
                row_id: Some(7),
                parent: "message".to_string(),
            },
            ForeignKeyViolation {
                table: "mention".to_string(),
                column: "message_id".to_string(),
                row_id: None,
                parent: "message".to_string(),
            },
        ]);

        let message = err.to_string();
        assert!(message.contains("reaction.message_id -> message (row 7)"));
        assert!(message.contains("mention.message_id -> message"));
    }

    #[test]
    fn test_cancelled_is_distinguishable() {
        assert!(BackupError::Cancelled.is_cancelled());
        assert!(!BackupError::BadMac.is_cancelled());
    }
}
