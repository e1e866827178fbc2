use std::io::IsTerminal;
use std::path::Path;

use fullbackup_core::sql;

use super::verify::{open_backup, verify_file};
use crate::app::{import_passphrase, load_config, Stores};
use crate::cli::Cli;
use crate::errors::from_backup_error;
use crate::ui::progress::run_with_progress;

pub fn handle_import(cli: &Cli, source: &Path, no_verify: bool, yes: bool) -> anyhow::Result<()> {
    let config = load_config(cli)?;
    // Fail on a bad path before prompting for anything.
    drop(open_backup(source)?);

    if std::io::stdin().is_terminal() && !yes && !cli.quiet {
        let proceed = dialoguer::Confirm::new()
            .with_prompt(format!(
                "Replace everything in {} with {}?",
                config.database.path,
                source.display()
            ))
            .default(false)
            .interact()?;
        if !proceed {
            return Err(anyhow::anyhow!("Import cancelled"));
        }
    }

    let passphrase = import_passphrase()?;

    let backup_version = if no_verify {
        None
    } else {
        let summary = verify_file(cli, source, &passphrase)?;
        if summary.bad_blobs > 0 {
            eprintln!(
                "Warning: {} damaged blob(s) in the backup will be skipped",
                summary.bad_blobs
            );
        }
        summary.database_version
    };

    let mut stores = Stores::open(&config)?;
    if let Some(version) = backup_version {
        adopt_version_if_fresh(&stores.db, version)?;
    }

    let file = open_backup(source)?;
    let passphrase = passphrase.as_str();
    tracing::info!(source = %source.display(), "Starting import");
    let event = run_with_progress("Importing", !cli.quiet, move |tx| {
        let mut importer = stores.importer();
        importer.import(file, passphrase, &tx)
    })?
    .map_err(from_backup_error)?;

    if !cli.quiet {
        println!(
            "Imported {} frames from {}",
            event.count,
            source.display()
        );
    }
    Ok(())
}

/// Give an empty, never-migrated database the backup's schema version.
///
/// An import refuses backups newer than the target database, and a database
/// created just now reports version 0.
fn adopt_version_if_fresh(db: &rusqlite::Connection, version: i64) -> anyhow::Result<()> {
    let has_tables = sql::table_names(db)?
        .iter()
        .any(|name| !name.starts_with("sqlite_"));
    if !has_tables && sql::user_version(db)? == 0 {
        tracing::debug!(version, "Setting schema version of empty database");
        sql::set_user_version(db, version)?;
    }
    Ok(())
}
