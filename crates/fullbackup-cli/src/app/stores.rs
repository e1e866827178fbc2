//! The database and companion stores named by the config.

use std::path::Path;

use fullbackup_core::export::{BackupExporter, ExportOptions};
use fullbackup_core::import::BackupImporter;
use fullbackup_core::storage::{AvatarStore, EncryptedBlobStore, JsonPreferenceStore, KeyValueStore};
use rusqlite::Connection;

use crate::config::{read_attachment_secret, FullbackupConfig};
use crate::errors::CliError;

/// Owned stores, so a worker thread can take them whole.
pub struct Stores {
    pub db: Connection,
    pub key_values: KeyValueStore,
    pub preferences: JsonPreferenceStore,
    pub blobs: EncryptedBlobStore,
    pub avatars: AvatarStore,
    release_channel_recipient_id: Option<i64>,
}

impl Stores {
    /// Open the stores for reading; the database must already exist.
    pub fn open_existing(config: &FullbackupConfig) -> anyhow::Result<Self> {
        let db_path = Path::new(&config.database.path);
        if !db_path.exists() {
            return Err(CliError::not_found(
                format!("No database found at {}", db_path.display()),
                "Check [database] path in the config file.",
            )
            .into());
        }
        Self::open(config)
    }

    /// Open the stores, creating the database and directories as needed.
    pub fn open(config: &FullbackupConfig) -> anyhow::Result<Self> {
        let db_path = Path::new(&config.database.path);
        let key_value_path = Path::new(&config.database.key_value_path);
        for path in [db_path, key_value_path] {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
        }

        let secret_path = Path::new(&config.storage.attachment_secret_path);
        if !secret_path.exists() {
            return Err(CliError::not_found(
                format!("No attachment secret found at {}", secret_path.display()),
                "Run:\n  fullbackup init",
            )
            .into());
        }
        let secret = read_attachment_secret(secret_path)?;

        let db = Connection::open(db_path)
            .map_err(|e| anyhow::anyhow!("Failed to open database {}: {}", db_path.display(), e))?;
        let key_values = KeyValueStore::open(key_value_path)?;

        Ok(Self {
            db,
            key_values,
            preferences: JsonPreferenceStore::new(&config.storage.preferences_dir),
            blobs: EncryptedBlobStore::new(&config.storage.attachments_dir, *secret),
            avatars: AvatarStore::new(&config.storage.avatars_dir),
            release_channel_recipient_id: config.export.release_channel_recipient_id,
        })
    }

    pub fn exporter(&self) -> BackupExporter<'_> {
        BackupExporter::new(
            &self.db,
            &self.key_values,
            &self.preferences,
            &self.blobs,
            &self.avatars,
        )
        .with_options(ExportOptions {
            release_channel_recipient_id: self.release_channel_recipient_id,
            ..ExportOptions::default()
        })
    }

    pub fn importer(&mut self) -> BackupImporter<'_> {
        BackupImporter::new(
            &mut self.db,
            &mut self.key_values,
            &mut self.preferences,
            &self.blobs,
            &self.avatars,
        )
    }
}
