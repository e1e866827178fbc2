//! Constants used throughout the CLI.

/// Exit codes for the CLI.
///
/// These follow common Unix conventions:
/// - 0: Success
/// - 1: General error (used by anyhow for unhandled errors)
/// - 2: Misuse of shell command (reserved by shells)
/// - 3+: Application-specific errors
pub mod exit_codes {
    /// Resource not found (config, database, backup file).
    pub const NOT_FOUND: i32 = 3;

    /// Invalid user input or arguments.
    pub const INVALID_INPUT: i32 = 4;

    /// Authentication failed (wrong passphrase).
    pub const AUTH_FAILED: i32 = 5;

    /// Backup is damaged or would break the target's integrity.
    pub const INTEGRITY_FAILED: i32 = 6;
}

/// Environment variable holding the backup passphrase.
pub const PASSPHRASE_ENV: &str = "FULLBACKUP_PASSPHRASE";

/// Environment variable holding the log filter.
pub const LOG_ENV: &str = "FULLBACKUP_LOG";

/// Log filter used when `FULLBACKUP_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "warn";
