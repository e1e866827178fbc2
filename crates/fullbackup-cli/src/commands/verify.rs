use std::path::Path;

use fullbackup_core::{verify_backup, VerifySummary};

use crate::app::import_passphrase;
use crate::cli::Cli;
use crate::errors::{from_backup_error, CliError};
use crate::ui::progress::run_with_progress;

pub fn handle_verify(cli: &Cli, source: &Path, json: bool) -> anyhow::Result<()> {
    let passphrase = import_passphrase()?;
    let summary = verify_file(cli, source, &passphrase)?;

    if json {
        let value = serde_json::json!({
            "frames": summary.frames,
            "blobs": summary.blobs,
            "bad_blobs": summary.bad_blobs,
            "database_version": summary.database_version,
            "statements": summary.statements,
            "preferences": summary.preferences,
            "key_values": summary.key_values,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    if !cli.quiet {
        println!("Backup OK: {}", source.display());
        match summary.database_version {
            Some(version) => println!("- database version: {}", version),
            None => println!("- database version: missing"),
        }
        println!("- frames: {}", summary.frames);
        println!("- statements: {}", summary.statements);
        println!("- preferences: {}", summary.preferences);
        println!("- key values: {}", summary.key_values);
        println!("- blobs: {}", summary.blobs);
        if summary.bad_blobs > 0 {
            println!(
                "- damaged blobs: {} (an import skips these)",
                summary.bad_blobs
            );
        }
    }
    Ok(())
}

/// Authenticate the backup at `source`, with a progress display.
pub(crate) fn verify_file(cli: &Cli, source: &Path, passphrase: &str) -> anyhow::Result<VerifySummary> {
    let file = open_backup(source)?;
    run_with_progress("Verifying", !cli.quiet, move |tx| {
        verify_backup(file, passphrase, &tx)
    })?
    .map_err(from_backup_error)
}

pub(crate) fn open_backup(source: &Path) -> anyhow::Result<std::fs::File> {
    std::fs::File::open(source).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            anyhow::Error::from(CliError::not_found(
                format!("No backup found at {}", source.display()),
                "Check the path and try again.",
            ))
        } else {
            anyhow::anyhow!("Failed to open backup {}: {}", source.display(), e)
        }
    })
}
