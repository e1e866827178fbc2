//! Config file resolution.

use std::path::{Path, PathBuf};

use crate::cli::Cli;
use crate::config::{default_config_path, read_config, FullbackupConfig};
use crate::errors::CliError;

/// Resolve the config file path from `--config` / `FULLBACKUP_CONFIG` or the XDG default.
pub fn resolve_config_path(cli: &Cli) -> anyhow::Result<PathBuf> {
    if let Some(path) = cli.config.as_ref() {
        if !path.as_os_str().is_empty() {
            return Ok(path.clone());
        }
    }
    default_config_path()
}

/// Load the config, failing with a hint when `init` has not been run.
pub fn load_config(cli: &Cli) -> anyhow::Result<FullbackupConfig> {
    let path = resolve_config_path(cli)?;
    if !path.exists() {
        return Err(CliError::not_found(
            format!("No configuration found at {}", path.display()),
            missing_config_hint(&path),
        )
        .into());
    }
    tracing::debug!(path = %path.display(), "Loading config");
    read_config(&path)
}

fn missing_config_hint(path: &Path) -> String {
    format!(
        "Run:\n  fullbackup init\n\nOr point at an existing config:\n  FULLBACKUP_CONFIG={} fullbackup ...",
        path.display()
    )
}
