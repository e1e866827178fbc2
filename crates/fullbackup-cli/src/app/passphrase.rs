//! Backup passphrase input.

use std::io::IsTerminal;

use dialoguer::Password;
use fullbackup_core::crypto::{format_passphrase, generate_passphrase, validate_passphrase};
use zeroize::Zeroizing;

use crate::constants::PASSPHRASE_ENV;
use crate::errors::CliError;

/// Passphrase chosen for an export.
pub struct ExportPassphrase {
    pub passphrase: Zeroizing<String>,
    /// Set when the passphrase was generated and must be shown to the user.
    pub generated: bool,
}

fn passphrase_from_env() -> Option<Zeroizing<String>> {
    std::env::var(PASSPHRASE_ENV)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(Zeroizing::new)
}

fn interactive() -> bool {
    std::io::stdin().is_terminal()
}

/// Pick the passphrase for a new backup.
///
/// `FULLBACKUP_PASSPHRASE` wins, then `--generate-passphrase`, then a
/// confirmed prompt on a TTY.
pub fn export_passphrase(generate: bool) -> anyhow::Result<ExportPassphrase> {
    if let Some(passphrase) = passphrase_from_env() {
        validate_passphrase(&passphrase).map_err(|e| CliError::invalid_input(e.to_string()))?;
        return Ok(ExportPassphrase {
            passphrase,
            generated: false,
        });
    }

    if generate {
        return Ok(ExportPassphrase {
            passphrase: format_passphrase(&generate_passphrase()),
            generated: true,
        });
    }

    if !interactive() {
        return Err(CliError::invalid_input(format!(
            "No passphrase provided and no TTY available. Set {} or pass --generate-passphrase.",
            PASSPHRASE_ENV
        ))
        .into());
    }

    let passphrase = Password::new()
        .with_prompt("Backup passphrase")
        .with_confirmation("Confirm passphrase", "Passphrases do not match")
        .interact()
        .map(Zeroizing::new)
        .map_err(|e| anyhow::anyhow!("Failed to read passphrase: {}", e))?;
    validate_passphrase(&passphrase).map_err(|e| CliError::invalid_input(e.to_string()))?;
    Ok(ExportPassphrase {
        passphrase,
        generated: false,
    })
}

/// Passphrase of an existing backup, from `FULLBACKUP_PASSPHRASE` or a prompt.
pub fn import_passphrase() -> anyhow::Result<Zeroizing<String>> {
    if let Some(passphrase) = passphrase_from_env() {
        return Ok(passphrase);
    }
    if !interactive() {
        return Err(CliError::invalid_input(format!(
            "No passphrase provided and no TTY available. Set {}.",
            PASSPHRASE_ENV
        ))
        .into());
    }
    Password::new()
        .with_prompt("Backup passphrase")
        .interact()
        .map(Zeroizing::new)
        .map_err(|e| anyhow::anyhow!("Failed to read passphrase: {}", e))
}
