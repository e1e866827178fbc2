//! Backup passphrase handling.
//!
//! Passphrases are compared and hashed with all spaces removed, so the
//! grouped form shown to users ("12345 67890 ...") and the compact form
//! derive the same key.

use rand::rngs::OsRng;
use rand::Rng;
use zeroize::Zeroizing;

use crate::error::{BackupError, Result};

/// Minimum passphrase length in characters, after normalization.
const MIN_PASSPHRASE_LENGTH: usize = 8;

/// Number of digits in a generated passphrase.
pub const GENERATED_PASSPHRASE_DIGITS: usize = 30;

/// Digits per display group in a generated passphrase.
const GROUP_SIZE: usize = 5;

/// Strip every space from a passphrase.
pub fn normalize_passphrase(passphrase: &str) -> Zeroizing<String> {
    Zeroizing::new(passphrase.replace(' ', ""))
}

/// Validate passphrase meets minimum security requirements.
///
/// # Requirements
///
/// - Not empty or only whitespace
/// - At least 8 characters once spaces are removed
///
/// # Examples
///
/// ```
/// use fullbackup_core::crypto::validate_passphrase;
///
/// assert!(validate_passphrase("12345 67890 12345").is_ok());
/// assert!(validate_passphrase("1 2 3 4").is_err());
/// ```
pub fn validate_passphrase(passphrase: &str) -> Result<()> {
    if passphrase.trim().is_empty() {
        return Err(BackupError::InvalidInput(
            "Passphrase cannot be empty".to_string(),
        ));
    }

    let normalized = normalize_passphrase(passphrase);
    let length = normalized.chars().count();
    if length < MIN_PASSPHRASE_LENGTH {
        return Err(BackupError::InvalidInput(format!(
            "Passphrase must be at least {} characters (got {})",
            MIN_PASSPHRASE_LENGTH, length
        )));
    }

    Ok(())
}

/// Generate a random numeric passphrase of [`GENERATED_PASSPHRASE_DIGITS`] digits.
///
/// The result is compact; use [`format_passphrase`] for display.
pub fn generate_passphrase() -> Zeroizing<String> {
    let mut rng = OsRng;
    let digits: String = (0..GENERATED_PASSPHRASE_DIGITS)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect();
    Zeroizing::new(digits)
}

/// Split a passphrase into space-separated groups of five for display.
pub fn format_passphrase(passphrase: &str) -> Zeroizing<String> {
    let normalized = normalize_passphrase(passphrase);
    let chars: Vec<char> = normalized.chars().collect();
    let grouped = chars
        .chunks(GROUP_SIZE)
        .map(|group| group.iter().collect::<String>())
        .collect::<Vec<_>>()
        .join(" ");
    Zeroizing::new(grouped)
}
