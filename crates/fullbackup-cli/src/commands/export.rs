use std::io::IsTerminal;
use std::path::Path;

use fullbackup_core::NeverCancel;

use crate::app::{export_passphrase, load_config, Stores};
use crate::cli::Cli;
use crate::errors::{from_backup_error, CliError};
use crate::ui::progress::run_with_progress;

pub fn handle_export(
    cli: &Cli,
    destination: &Path,
    generate_passphrase: bool,
    force: bool,
) -> anyhow::Result<()> {
    let config = load_config(cli)?;
    let stores = Stores::open_existing(&config)?;

    if destination.exists() && !force {
        let interactive = std::io::stdin().is_terminal() && !cli.quiet;
        if !interactive {
            return Err(CliError::invalid_input(format!(
                "{} already exists. Pass --force to overwrite it.",
                destination.display()
            ))
            .into());
        }
        let proceed = dialoguer::Confirm::new()
            .with_prompt(format!("Overwrite {}?", destination.display()))
            .default(false)
            .interact()?;
        if !proceed {
            return Err(anyhow::anyhow!("Export cancelled"));
        }
    }

    let chosen = export_passphrase(generate_passphrase)?;
    let passphrase = chosen.passphrase.as_str();

    tracing::info!(destination = %destination.display(), "Starting export");
    let event = run_with_progress("Exporting", !cli.quiet, move |tx| {
        let exporter = stores.exporter();
        exporter.export_to_file(destination, passphrase, &NeverCancel, &tx)
    })?
    .map_err(from_backup_error)?;

    if chosen.generated {
        // Printed even in quiet mode: the backup is useless without it.
        println!("Passphrase: {}", passphrase);
    }
    if !cli.quiet {
        println!(
            "Exported {} frames to {}",
            event.count,
            destination.display()
        );
    }
    Ok(())
}
