//! Full backup import.
//!
//! Import replaces the target database wholesale: every table, view and
//! trigger is dropped and rebuilt from the backup's statements inside one
//! transaction, alongside a transaction on the key-value store. Nothing is
//! committed until the whole stream has been authenticated and the
//! restored rows pass a foreign key check.

use std::io::{BufReader, Read, Write};
use std::path::PathBuf;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rusqlite::{params, params_from_iter, Connection, ErrorCode};
use tracing::{debug, info, warn};

use crate::error::{BackupError, Result};
use crate::format::{
    BackupFrame, BackupFrameReader, KeyValueData, PreferenceValue, SharedPreference, SqlStatement,
};
use crate::order::drop_order;
use crate::progress::{BackupEvent, BackupPhase, ProgressListener};
use crate::schema::{is_skipped_statement, SchemaFilter};
use crate::sql;
use crate::storage::{AvatarStore, BlobStore, KeyValueStore, KeyValueTransaction, PreferenceStore};

/// Progress is reported once per this many frames.
const PROGRESS_INTERVAL: u64 = 100;

/// Violations on these tables do not block an import.
const IGNORED_FOREIGN_KEY_PREFIX: &str = "msl_";

const LEGACY_IDENTITY_PREFERENCES: &str = "SecureSMS-Preferences";
const LEGACY_IDENTITY_KEYS: &[(&str, &str)] = &[
    ("pref_identity_public_v3", "account.aci_identity_public_key"),
    ("pref_identity_private_v3", "account.aci_identity_private_key"),
];

/// Where a restored blob's location is recorded.
struct BlobColumns {
    table: &'static str,
    file: &'static str,
    random: &'static str,
}

const ATTACHMENT_COLUMNS: BlobColumns = BlobColumns {
    table: "attachment",
    file: "data_file",
    random: "data_random",
};

const LEGACY_PART_COLUMNS: BlobColumns = BlobColumns {
    table: "part",
    file: "_data",
    random: "data_random",
};

const STICKER_COLUMNS: BlobColumns = BlobColumns {
    table: "sticker",
    file: "file_path",
    random: "file_random",
};

/// Restores a backup into a database and its companion stores.
pub struct BackupImporter<'a> {
    db: &'a mut Connection,
    key_values: &'a mut KeyValueStore,
    preferences: &'a mut dyn PreferenceStore,
    blobs: &'a dyn BlobStore,
    avatars: &'a AvatarStore,
}

/// Files written during an import.
///
/// Blobs are removed again if the import fails before the database commits;
/// after that, committed rows point at them. Avatars are staged beside the
/// store and only replace existing ones once both transactions commit.
#[derive(Debug, Default)]
struct CreatedFiles {
    blobs: Vec<PathBuf>,
    avatars: Vec<StagedAvatar>,
}

#[derive(Debug)]
struct StagedAvatar {
    name: String,
    staged: PathBuf,
}

impl CreatedFiles {
    /// The database now references every recorded blob.
    fn keep_blobs(&mut self) {
        self.blobs.clear();
    }

    /// Move staged avatars into place in backup order. Avatars not yet
    /// installed when one fails stay recorded for [`remove_all`](Self::remove_all).
    fn install_avatars(&mut self, avatars: &AvatarStore) -> Result<()> {
        let mut pending = std::mem::take(&mut self.avatars).into_iter();
        while let Some(avatar) = pending.next() {
            if let Err(e) = avatars.install(&avatar.staged, &avatar.name) {
                self.avatars.extend(pending);
                return Err(e);
            }
        }
        Ok(())
    }

    fn remove_all(&self, blobs: &dyn BlobStore, avatars: &AvatarStore) {
        for path in &self.blobs {
            if let Err(e) = blobs.remove(path) {
                warn!(path = %path.display(), error = %e, "Could not remove blob from failed import");
            }
        }
        for avatar in &self.avatars {
            if let Err(e) = avatars.discard(&avatar.staged) {
                warn!(name = %avatar.name, error = %e, "Could not remove staged avatar from failed import");
            }
        }
    }
}

/// Everything the replay loop writes into.
struct ReplayTarget<'t, 'k> {
    db: &'t Connection,
    key_values: &'t KeyValueTransaction<'k>,
    blobs: &'t dyn BlobStore,
    avatars: &'t AvatarStore,
}

impl<'a> BackupImporter<'a> {
    pub fn new(
        db: &'a mut Connection,
        key_values: &'a mut KeyValueStore,
        preferences: &'a mut dyn PreferenceStore,
        blobs: &'a dyn BlobStore,
        avatars: &'a AvatarStore,
    ) -> Self {
        Self {
            db,
            key_values,
            preferences,
            blobs,
            avatars,
        }
    }

    /// Replace the database and stores with the contents of a backup.
    ///
    /// The header is read and the key derived before any store is touched,
    /// so a stream that is not a backup fails without side effects. A
    /// failure before the database commits rolls back both transactions and
    /// removes the blob files the import created. Existing avatars are only
    /// replaced after both transactions commit, and preferences after that.
    pub fn import<R: Read>(
        &mut self,
        input: R,
        passphrase: &str,
        progress: &dyn ProgressListener,
    ) -> Result<BackupEvent> {
        let mut reader = BackupFrameReader::open(BufReader::new(input), passphrase)?;
        info!(version = reader.version(), "Importing backup");

        // SQLite ignores this pragma inside a transaction.
        sql::set_foreign_keys(self.db, false)?;

        let mut created = CreatedFiles::default();
        let result = replay(
            &mut *self.db,
            &mut *self.key_values,
            self.blobs,
            self.avatars,
            &mut reader,
            &mut created,
            progress,
        );
        let restored = sql::set_foreign_keys(self.db, true);

        let (event, preferences) = match result {
            Ok(replayed) => replayed,
            Err(e) => {
                created.remove_all(self.blobs, self.avatars);
                return Err(e);
            }
        };
        if let Err(e) = created.install_avatars(self.avatars) {
            created.remove_all(self.blobs, self.avatars);
            return Err(e);
        }
        restored?;

        for preference in &preferences {
            self.preferences.restore(preference)?;
        }

        info!(frames = event.count, "Backup import finished");
        progress.on_event(event);
        Ok(event)
    }
}

/// Tear down, replay and commit. Preferences are handed back so they are
/// only written once the database commit has succeeded.
fn replay<R: Read>(
    db: &mut Connection,
    key_values: &mut KeyValueStore,
    blobs: &dyn BlobStore,
    avatars: &AvatarStore,
    reader: &mut BackupFrameReader<R>,
    created: &mut CreatedFiles,
    progress: &dyn ProgressListener,
) -> Result<(BackupEvent, Vec<SharedPreference>)> {
    let tx = db.transaction()?;
    let kv_tx = key_values.transaction()?;

    drop_all(&tx)?;

    let target = ReplayTarget {
        db: &tx,
        key_values: &kv_tx,
        blobs,
        avatars,
    };
    let mut preferences = Vec::new();
    let mut count = 0u64;

    loop {
        let frame = reader.read_frame()?;
        count += 1;
        if count % PROGRESS_INTERVAL == 0 {
            progress.on_event(BackupEvent::new(BackupPhase::Importing, count, 0));
        }

        match frame {
            BackupFrame::End => break,
            BackupFrame::Header(_) => {
                return Err(BackupError::MalformedFrame(
                    "Header frame after start of backup".to_string(),
                ))
            }
            BackupFrame::DatabaseVersion { version } => {
                let current = sql::user_version(target.db)?;
                if version > current {
                    return Err(BackupError::DatabaseDowngrade {
                        current,
                        backup: version,
                    });
                }
                sql::set_user_version(target.db, version)?;
            }
            BackupFrame::Statement(statement) => execute_statement(target.db, &statement)?,
            BackupFrame::Preference(preference) => {
                if let Some((key, value)) = legacy_identity_key(&preference)? {
                    target.key_values.put(key, &value)?;
                } else {
                    preferences.push(preference);
                }
            }
            BackupFrame::KeyValue(entry) => target.key_values.put(&entry.key, &entry.value)?,
            BackupFrame::Attachment { row_id, length } => {
                let columns = if sql::table_exists(target.db, ATTACHMENT_COLUMNS.table)? {
                    &ATTACHMENT_COLUMNS
                } else {
                    &LEGACY_PART_COLUMNS
                };
                restore_blob(&target, reader, created, columns, row_id, length)?;
            }
            BackupFrame::Sticker { row_id, length } => {
                restore_blob(&target, reader, created, &STICKER_COLUMNS, row_id, length)?;
            }
            BackupFrame::Avatar {
                name,
                recipient_id,
                length,
            } => {
                let name = recipient_id.unwrap_or(name);
                restore_avatar(&target, reader, created, &name, length)?;
            }
        }
    }

    let violations: Vec<_> = sql::foreign_key_violations(&tx)?
        .into_iter()
        .filter(|v| !v.table.starts_with(IGNORED_FOREIGN_KEY_PREFIX))
        .collect();
    if !violations.is_empty() {
        return Err(BackupError::ForeignKeyViolation(violations));
    }

    tx.commit()?;
    created.keep_blobs();
    kv_tx.commit()?;

    Ok((
        BackupEvent::new(BackupPhase::Finished, count, 0),
        preferences,
    ))
}

/// Drop every trigger, view and table so the backup's schema can be replayed.
fn drop_all(db: &Connection) -> Result<()> {
    for trigger in sql::trigger_names(db)? {
        db.execute_batch(&format!(
            "DROP TRIGGER IF EXISTS {}",
            sql::quote_identifier(&trigger)
        ))?;
    }
    for view in sql::view_names(db)? {
        db.execute_batch(&format!("DROP VIEW IF EXISTS {}", sql::quote_identifier(&view)))?;
    }

    let filter = SchemaFilter::load(db)?;
    let (shadow, tables): (Vec<String>, Vec<String>) = sql::table_names(db)?
        .into_iter()
        .filter(|table| !table.starts_with("sqlite_"))
        .partition(|table| filter.is_shadow_table(table));

    let dependencies = sql::dependency_map(db, &tables)?;
    let order = drop_order(&dependencies)?;
    info!(tables = order.len(), "Dropping existing tables");

    // Dropping a virtual table takes its shadow tables with it.
    for table in order.iter().chain(shadow.iter()) {
        debug!(table = %table, "Dropping table");
        db.execute_batch(&format!(
            "DROP TABLE IF EXISTS {}",
            sql::quote_identifier(table)
        ))?;
    }
    Ok(())
}

fn execute_statement(db: &Connection, statement: &SqlStatement) -> Result<()> {
    if is_skipped_statement(&statement.statement) {
        debug!(statement = %statement.statement, "Skipping statement");
        return Ok(());
    }

    match db.execute(
        &statement.statement,
        params_from_iter(statement.parameters.iter()),
    ) {
        Ok(_) => Ok(()),
        Err(e) if e.sqlite_error_code() == Some(ErrorCode::ConstraintViolation) => {
            match sql::insert_target(&statement.statement) {
                Some(table) => Err(BackupError::ConstraintViolation { table, source: e }),
                None => Err(e.into()),
            }
        }
        Err(e) => Err(e.into()),
    }
}

/// Identity keys that older backups kept in shared preferences belong in
/// the key-value store.
fn legacy_identity_key(
    preference: &SharedPreference,
) -> Result<Option<(&'static str, KeyValueData)>> {
    if preference.file != LEGACY_IDENTITY_PREFERENCES {
        return Ok(None);
    }
    let Some((_, key)) = LEGACY_IDENTITY_KEYS
        .iter()
        .find(|(pref, _)| *pref == preference.key)
    else {
        return Ok(None);
    };
    let PreferenceValue::String(encoded) = &preference.value else {
        return Err(BackupError::MalformedFrame(format!(
            "Identity preference {} is not a string",
            preference.key
        )));
    };
    let decoded = STANDARD.decode(encoded).map_err(|e| {
        BackupError::MalformedFrame(format!(
            "Identity preference {} is not base64: {}",
            preference.key, e
        ))
    })?;
    Ok(Some((*key, KeyValueData::Blob(decoded))))
}

/// Stream the blob after an attachment or sticker frame into a new stored
/// file and point the owning row at it.
///
/// A blob that fails its MAC is dropped and the row's columns nulled; the
/// rest of the import carries on.
fn restore_blob<R: Read>(
    target: &ReplayTarget<'_, '_>,
    reader: &mut BackupFrameReader<R>,
    created: &mut CreatedFiles,
    columns: &BlobColumns,
    row_id: i64,
    length: u64,
) -> Result<()> {
    let mut blob = target.blobs.create()?;
    created.blobs.push(blob.path.clone());

    let update = format!(
        "UPDATE {} SET {} = ?1, {} = ?2 WHERE _id = ?3",
        sql::quote_identifier(columns.table),
        sql::quote_identifier(columns.file),
        sql::quote_identifier(columns.random),
    );

    match reader.read_blob_to(length, &mut blob.writer) {
        Ok(()) => {
            blob.writer.flush()?;
            drop(blob.writer);
            let path = blob.path.to_string_lossy().into_owned();
            let updated = target
                .db
                .execute(&update, params![path, blob.random, row_id])?;
            if updated == 0 {
                warn!(table = columns.table, row_id, "Blob has no matching row, discarding");
                target.blobs.remove(&blob.path)?;
                created.blobs.pop();
            }
            Ok(())
        }
        Err(BackupError::BlobBadMac) => {
            drop(blob.writer);
            warn!(table = columns.table, row_id, "Blob failed authentication, dropping it");
            target.blobs.remove(&blob.path)?;
            created.blobs.pop();
            target.db.execute(
                &update,
                params![Option::<String>::None, Option::<Vec<u8>>::None, row_id],
            )?;
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Stream an avatar into a staged file. One that fails its MAC is dropped
/// and any existing avatar of the same name is left alone.
fn restore_avatar<R: Read>(
    target: &ReplayTarget<'_, '_>,
    reader: &mut BackupFrameReader<R>,
    created: &mut CreatedFiles,
    name: &str,
    length: u64,
) -> Result<()> {
    let (staged, mut file) = target.avatars.stage(name)?;
    created.avatars.push(StagedAvatar {
        name: name.to_string(),
        staged: staged.clone(),
    });

    match reader.read_blob_to(length, &mut file) {
        Ok(()) => {
            file.flush()?;
            Ok(())
        }
        Err(BackupError::BlobBadMac) => {
            drop(file);
            warn!(name = %name, "Avatar failed authentication, dropping it");
            target.avatars.discard(&staged)?;
            created.avatars.pop();
            Ok(())
        }
        Err(e) => Err(e),
    }
}
