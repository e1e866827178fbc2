use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use fullbackup_core::storage::blobs::SECRET_LENGTH;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

#[derive(Debug, Serialize, Deserialize)]
pub struct FullbackupConfig {
    pub database: DatabaseSection,
    pub storage: StorageSection,
    #[serde(default)]
    pub export: ExportSection,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DatabaseSection {
    pub path: String,
    pub key_value_path: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StorageSection {
    pub attachments_dir: String,
    pub avatars_dir: String,
    pub preferences_dir: String,
    pub attachment_secret_path: String,
}

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct ExportSection {
    /// Messages to or from this recipient are left out of exports.
    pub release_channel_recipient_id: Option<i64>,
}

impl FullbackupConfig {
    /// Config with every store laid out under `data_dir`.
    pub fn new(data_dir: &Path) -> Self {
        let path = |name: &str| data_dir.join(name).to_string_lossy().to_string();
        Self {
            database: DatabaseSection {
                path: path("app.db"),
                key_value_path: path("key_value.db"),
            },
            storage: StorageSection {
                attachments_dir: path("attachments"),
                avatars_dir: path("avatars"),
                preferences_dir: path("shared_prefs"),
                attachment_secret_path: path("attachment.secret"),
            },
            export: ExportSection::default(),
        }
    }
}

pub fn default_config_path() -> anyhow::Result<PathBuf> {
    Ok(xdg_config_dir()?.join("config.toml"))
}

pub fn default_data_dir() -> anyhow::Result<PathBuf> {
    xdg_data_dir()
}

pub fn read_config(path: &Path) -> anyhow::Result<FullbackupConfig> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read config {}: {}", path.display(), e))?;
    toml::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("Failed to parse config {}: {}", path.display(), e))
}

pub fn write_config(path: &Path, config: &FullbackupConfig) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            anyhow::anyhow!(
                "Failed to create config directory {}: {}",
                parent.display(),
                e
            )
        })?;
    }
    let contents =
        toml::to_string_pretty(config).map_err(|e| anyhow::anyhow!("TOML error: {}", e))?;
    std::fs::write(path, contents)
        .map_err(|e| anyhow::anyhow!("Failed to write config {}: {}", path.display(), e))?;
    Ok(())
}

/// Read the base64 attachment secret that keys the blob store.
pub fn read_attachment_secret(path: &Path) -> anyhow::Result<Zeroizing<[u8; SECRET_LENGTH]>> {
    let contents = Zeroizing::new(std::fs::read_to_string(path).map_err(|e| {
        anyhow::anyhow!("Failed to read attachment secret {}: {}", path.display(), e)
    })?);
    let decoded = Zeroizing::new(STANDARD.decode(contents.trim()).map_err(|e| {
        anyhow::anyhow!("Attachment secret {} is not base64: {}", path.display(), e)
    })?);
    if decoded.len() != SECRET_LENGTH {
        return Err(anyhow::anyhow!(
            "Attachment secret {} must be {} bytes (got {})",
            path.display(),
            SECRET_LENGTH,
            decoded.len()
        ));
    }
    let mut secret = Zeroizing::new([0u8; SECRET_LENGTH]);
    secret.copy_from_slice(&decoded);
    Ok(secret)
}

/// Generate a fresh attachment secret at `path`, readable only by the owner.
pub fn write_attachment_secret(path: &Path) -> anyhow::Result<()> {
    let mut secret = Zeroizing::new([0u8; SECRET_LENGTH]);
    OsRng.fill_bytes(secret.as_mut_slice());
    let encoded = Zeroizing::new(STANDARD.encode(secret.as_slice()));

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, encoded.as_bytes()).map_err(|e| {
        anyhow::anyhow!("Failed to write attachment secret {}: {}", path.display(), e)
    })?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

pub fn xdg_config_dir() -> anyhow::Result<PathBuf> {
    if let Ok(value) = std::env::var("XDG_CONFIG_HOME") {
        if !value.trim().is_empty() {
            return Ok(PathBuf::from(value).join("fullbackup"));
        }
    }
    Ok(home_dir()?.join(".config").join("fullbackup"))
}

pub fn xdg_data_dir() -> anyhow::Result<PathBuf> {
    if let Ok(value) = std::env::var("XDG_DATA_HOME") {
        if !value.trim().is_empty() {
            return Ok(PathBuf::from(value).join("fullbackup"));
        }
    }
    Ok(home_dir()?.join(".local").join("share").join("fullbackup"))
}

fn home_dir() -> anyhow::Result<PathBuf> {
    let home = std::env::var("HOME")
        .map_err(|_| anyhow::anyhow!("HOME is not set; cannot resolve default paths"))?;
    Ok(PathBuf::from(home))
}
