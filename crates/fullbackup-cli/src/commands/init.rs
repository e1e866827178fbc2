use std::path::Path;

use crate::app::resolve_config_path;
use crate::cli::Cli;
use crate::config::{default_data_dir, write_attachment_secret, write_config, FullbackupConfig};
use crate::errors::CliError;

pub fn handle_init(cli: &Cli, data_dir: Option<&Path>, force: bool) -> anyhow::Result<()> {
    let config_path = resolve_config_path(cli)?;
    if config_path.exists() && !force {
        return Err(CliError::invalid_input(format!(
            "Config already exists at {}. Pass --force to overwrite it.",
            config_path.display()
        ))
        .into());
    }

    let data_dir = match data_dir {
        Some(dir) => dir.to_path_buf(),
        None => default_data_dir()?,
    };
    std::fs::create_dir_all(&data_dir).map_err(|e| {
        anyhow::anyhow!("Failed to create data directory {}: {}", data_dir.display(), e)
    })?;

    let config = FullbackupConfig::new(&data_dir);
    for dir in [
        &config.storage.attachments_dir,
        &config.storage.avatars_dir,
        &config.storage.preferences_dir,
    ] {
        std::fs::create_dir_all(dir)?;
    }

    // An existing secret still decrypts the blobs already on disk.
    let secret_path = Path::new(&config.storage.attachment_secret_path);
    if !secret_path.exists() {
        write_attachment_secret(secret_path)?;
    }

    write_config(&config_path, &config)?;
    tracing::info!(config = %config_path.display(), data = %data_dir.display(), "Initialized");

    if !cli.quiet {
        println!("Wrote config to {}", config_path.display());
        println!("Data directory: {}", data_dir.display());
    }
    Ok(())
}
