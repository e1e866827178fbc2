//! Full backup export.
//!
//! The exporter walks the database schema and rows, then the preferences,
//! key-values and avatars, writing each as a frame through
//! [`BackupFrameWriter`]. Rows that should not survive a restore (expiring
//! or view-once messages and everything hanging off them) are filtered out
//! here rather than cleaned up on import.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use rusqlite::{Connection, Row};
use tracing::{debug, info, warn};

use crate::error::{BackupError, Result};
use crate::format::BackupFrameWriter;
use crate::order::export_order;
use crate::progress::{
    check_cancelled, BackupEvent, BackupPhase, CancellationSignal, ProgressListener,
};
use crate::schema::{is_content_denied, SchemaFilter};
use crate::sql;
use crate::storage::{AvatarStore, BlobStore, KeyValueStore, PreferenceStore};

pub(crate) const MESSAGE_TABLE: &str = "message";
pub(crate) const REACTION_TABLE: &str = "reaction";
pub(crate) const MENTION_TABLE: &str = "mention";
pub(crate) const GROUP_RECEIPTS_TABLE: &str = "group_receipts";
pub(crate) const ATTACHMENT_TABLE: &str = "attachment";
pub(crate) const STICKER_TABLE: &str = "sticker";

const DATABASE_VERSION_RECORD_COUNT: u64 = 1;
const TABLE_RECORD_COUNT_MULTIPLIER: u64 = 3;
const FINAL_MESSAGE_COUNT: u64 = 1;

/// Messages due to disappear within this window are left out.
const EXPIRATION_BACKUP_THRESHOLD_MILLIS: i64 = 24 * 60 * 60 * 1000;

/// Tuning for a single export.
#[derive(Debug, Clone)]
pub struct ExportOptions {
    /// Messages sent from or to this recipient are not exported
    pub release_channel_recipient_id: Option<i64>,
    /// Clock used to judge message expiry, in Unix milliseconds
    pub now_millis: i64,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            release_channel_recipient_id: None,
            now_millis: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Exports a database and its companion stores as one encrypted backup.
pub struct BackupExporter<'a> {
    db: &'a Connection,
    key_values: &'a KeyValueStore,
    preferences: &'a dyn PreferenceStore,
    blobs: &'a dyn BlobStore,
    avatars: &'a AvatarStore,
    options: ExportOptions,
}

/// Per-export state: the output, the running count and the estimate.
struct ExportRun<'r, W: Write> {
    writer: BackupFrameWriter<W>,
    cancel: &'r dyn CancellationSignal,
    progress: &'r dyn ProgressListener,
    count: u64,
    estimate: u64,
}

impl<W: Write> ExportRun<'_, W> {
    fn check_cancelled(&self) -> Result<()> {
        check_cancelled(self.cancel)
    }

    fn advance(&mut self) {
        self.count += 1;
        self.progress.on_event(BackupEvent::new(
            BackupPhase::Exporting,
            self.count,
            self.estimate,
        ));
    }
}

type RowFilter<'f> = &'f dyn Fn(&Row<'_>) -> Result<bool>;
type RowPostProcess<'f, 'r, W> = &'f dyn Fn(&Row<'_>, &mut ExportRun<'r, W>) -> Result<()>;

impl<'a> BackupExporter<'a> {
    pub fn new(
        db: &'a Connection,
        key_values: &'a KeyValueStore,
        preferences: &'a dyn PreferenceStore,
        blobs: &'a dyn BlobStore,
        avatars: &'a AvatarStore,
    ) -> Self {
        Self {
            db,
            key_values,
            preferences,
            blobs,
            avatars,
            options: ExportOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ExportOptions) -> Self {
        self.options = options;
        self
    }

    /// Write a complete backup to `output`.
    ///
    /// Returns the `Finished` event carrying the number of frames written
    /// and the estimate progress was reported against. The output is
    /// flushed and dropped whether or not the export succeeds.
    pub fn export<W: Write>(
        &self,
        output: W,
        passphrase: &str,
        cancel: &dyn CancellationSignal,
        progress: &dyn ProgressListener,
    ) -> Result<BackupEvent> {
        let writer = BackupFrameWriter::create(BufWriter::new(output), passphrase)?;
        let mut run = ExportRun {
            writer,
            cancel,
            progress,
            count: 0,
            estimate: 0,
        };

        let result = self.export_frames(&mut run);
        let flushed = run.writer.flush();

        match result {
            Ok(event) => {
                flushed?;
                info!(frames = event.count, "Backup export finished");
                progress.on_event(event);
                Ok(event)
            }
            Err(e) => {
                if e.is_cancelled() {
                    info!(count = run.count, "Backup export cancelled");
                }
                Err(e)
            }
        }
    }

    /// Write a backup to `path` through a temp file renamed into place.
    ///
    /// A failed or cancelled export leaves no file behind.
    pub fn export_to_file(
        &self,
        path: &Path,
        passphrase: &str,
        cancel: &dyn CancellationSignal,
        progress: &dyn ProgressListener,
    ) -> Result<BackupEvent> {
        let (temp_path, file) = crate::fs::create_temp_beside(path)?;

        let result = self
            .export(&file, passphrase, cancel, progress)
            .and_then(|event| {
                file.sync_all()?;
                Ok(event)
            });
        drop(file);

        match result {
            Ok(event) => {
                crate::fs::rename_with_fallback(&temp_path, path)?;
                Ok(event)
            }
            Err(e) => {
                let _ = fs::remove_file(&temp_path);
                Err(e)
            }
        }
    }

    /// Number of progress events a full export is expected to report.
    pub fn estimate_total(&self) -> Result<u64> {
        let filter = SchemaFilter::load(self.db)?;
        let tables = self.exported_tables(&filter)?;
        let messages = MessageIndex::load(self.db, &self.options)?;
        self.estimate(&tables, &messages)
    }

    fn export_frames<W: Write>(&self, run: &mut ExportRun<'_, W>) -> Result<BackupEvent> {
        let filter = SchemaFilter::load(self.db)?;
        let tables = self.exported_tables(&filter)?;
        let messages = MessageIndex::load(self.db, &self.options)?;
        run.estimate = self.estimate(&tables, &messages)?;
        info!(tables = ?tables, estimate = run.estimate, "Exporting tables");

        run.writer.write_database_version(sql::user_version(self.db)?)?;
        run.count += DATABASE_VERSION_RECORD_COUNT;

        self.export_schema(run, &filter, &tables)?;
        run.count += TABLE_RECORD_COUNT_MULTIPLIER * tables.len() as u64;

        for table in &tables {
            run.check_cancelled()?;
            self.export_table_rows(run, table, &messages)?;
        }

        for preference in self.preferences.preferences_to_backup()? {
            run.check_cancelled()?;
            run.advance();
            run.writer.write_preference(preference)?;
        }

        for key_value in self.key_values.data_set()? {
            run.check_cancelled()?;
            run.advance();
            run.writer.write_key_value(key_value)?;
        }

        for avatar in self.avatars.list()? {
            run.check_cancelled()?;
            let file = match self.avatars.open(&avatar.name) {
                Ok(file) => file,
                Err(BackupError::Io { source }) if source.kind() == io::ErrorKind::NotFound => {
                    warn!(name = %avatar.name, "Avatar disappeared before export, skipping");
                    continue;
                }
                Err(e) => return Err(e),
            };
            run.advance();
            run.writer.write_avatar(
                &avatar.name,
                avatar.recipient_id.as_deref(),
                avatar.length,
                file,
            )?;
        }

        run.writer.write_end()?;
        Ok(BackupEvent::new(
            BackupPhase::Finished,
            run.writer.frames_written(),
            run.estimate,
        ))
    }

    fn exported_tables(&self, filter: &SchemaFilter) -> Result<Vec<String>> {
        let tables: Vec<String> = sql::table_names(self.db)?
            .into_iter()
            .filter(|table| filter.is_table_allowed(table))
            .collect();
        let mut dependencies = sql::dependency_map(self.db, &tables)?;
        // Keep only edges between exported tables.
        for parents in dependencies.values_mut() {
            parents.retain(|parent| tables.contains(parent));
        }
        Ok(export_order(&dependencies))
    }

    fn export_schema<W: Write>(
        &self,
        run: &mut ExportRun<'_, W>,
        filter: &SchemaFilter,
        tables: &[String],
    ) -> Result<()> {
        let objects = sql::schema_objects(self.db)?;

        let create_statements: HashMap<&str, &str> = objects
            .iter()
            .filter(|object| object.kind == "table")
            .filter_map(|object| Some((object.name.as_str(), object.sql.as_deref()?)))
            .collect();

        for table in tables {
            let statement = create_statements.get(table.as_str()).ok_or_else(|| {
                BackupError::Schema(format!("No CREATE statement for table {}", table))
            })?;
            run.writer
                .write_statement(crate::format::SqlStatement::bare(*statement))?;
        }

        for object in objects.iter().filter(|object| object.kind != "table") {
            let Some(statement) = object.sql.as_deref() else {
                continue;
            };
            if filter.is_table_allowed(&object.name) {
                run.writer
                    .write_statement(crate::format::SqlStatement::bare(statement))?;
            }
        }
        Ok(())
    }

    fn export_table_rows<'r, W: Write>(
        &self,
        run: &mut ExportRun<'r, W>,
        table: &str,
        messages: &MessageIndex,
    ) -> Result<()> {
        if is_content_denied(table) {
            debug!(table, "Skipping rows of deny-listed table");
            return Ok(());
        }
        debug!(table, "Exporting table");

        match table {
            MESSAGE_TABLE => {
                let include = |row: &Row<'_>| -> Result<bool> {
                    Ok(messages.is_exportable(row.get::<_, i64>("_id")?))
                };
                self.export_table(run, table, Some(&include), None)
            }
            REACTION_TABLE | MENTION_TABLE | GROUP_RECEIPTS_TABLE => {
                let column = parent_message_column(table);
                if !sql::column_exists(self.db, table, column)? {
                    return self.export_table(run, table, None, None);
                }
                let include = |row: &Row<'_>| -> Result<bool> {
                    Ok(messages.is_exportable_parent(row.get(column)?))
                };
                self.export_table(run, table, Some(&include), None)
            }
            ATTACHMENT_TABLE => {
                let filtered = sql::column_exists(self.db, table, "message_id")?;
                let include = |row: &Row<'_>| -> Result<bool> {
                    Ok(!filtered || messages.is_exportable_parent(row.get("message_id")?))
                };
                let blob = |row: &Row<'_>, run: &mut ExportRun<'r, W>| -> Result<()> {
                    self.export_attachment_blob(row, run)
                };
                self.export_table(run, table, Some(&include), Some(&blob))
            }
            STICKER_TABLE => {
                let blob = |row: &Row<'_>, run: &mut ExportRun<'r, W>| -> Result<()> {
                    self.export_sticker_blob(row, run)
                };
                self.export_table(run, table, None, Some(&blob))
            }
            _ => self.export_table(run, table, None, None),
        }
    }

    fn export_table<'r, W: Write>(
        &self,
        run: &mut ExportRun<'r, W>,
        table: &str,
        include: Option<RowFilter<'_>>,
        post_process: Option<RowPostProcess<'_, 'r, W>>,
    ) -> Result<()> {
        let mut stmt = self
            .db
            .prepare(&format!("SELECT * FROM {}", sql::quote_identifier(table)))?;
        let columns = stmt.column_count();
        let mut rows = stmt.query([])?;

        while let Some(row) = rows.next()? {
            run.check_cancelled()?;
            if let Some(include) = include {
                if !include(row)? {
                    continue;
                }
            }

            let statement = sql::insert_statement(table, row, columns)?;
            run.advance();
            run.writer.write_statement(statement)?;

            if let Some(post_process) = post_process {
                post_process(row, run)?;
            }
        }
        Ok(())
    }

    fn export_attachment_blob<W: Write>(
        &self,
        row: &Row<'_>,
        run: &mut ExportRun<'_, W>,
    ) -> Result<()> {
        let row_id: i64 = row.get("_id")?;
        let data_file: Option<String> = row.get("data_file")?;
        let Some(data_file) = data_file.filter(|path| !path.is_empty()) else {
            return Ok(());
        };
        let path = PathBuf::from(data_file);
        let Some(random) = row.get::<_, Option<Vec<u8>>>("data_random")? else {
            warn!(row_id, "Attachment has a data file but no random, skipping blob");
            return Ok(());
        };

        let recorded = row.get::<_, Option<i64>>("data_size")?;
        let Some(size) = self.attachment_blob_length(&path, &random, recorded)? else {
            warn!(row_id, path = %path.display(), "Attachment file is missing or empty, skipping blob");
            return Ok(());
        };
        if recorded != i64::try_from(size).ok() {
            warn!(
                row_id,
                stored_size = recorded.unwrap_or(0),
                measured = size,
                "Attachment size does not match its file, using measured length"
            );
        }

        let Some(input) = self.open_blob(&path, &random)? else {
            warn!(row_id, path = %path.display(), "Attachment file is missing, skipping blob");
            return Ok(());
        };
        run.advance();
        run.writer.write_attachment(row_id, size, input)
    }

    fn export_sticker_blob<W: Write>(
        &self,
        row: &Row<'_>,
        run: &mut ExportRun<'_, W>,
    ) -> Result<()> {
        let row_id: i64 = row.get("_id")?;
        let file_path: Option<String> = row.get("file_path")?;
        let length = row.get::<_, Option<i64>>("file_length")?.unwrap_or(0);
        let Some(file_path) = file_path.filter(|path| !path.is_empty()) else {
            return Ok(());
        };
        if length <= 0 {
            return Ok(());
        }
        let path = PathBuf::from(file_path);
        let Some(random) = row.get::<_, Option<Vec<u8>>>("file_random")? else {
            warn!(row_id, "Sticker has a file but no random, skipping blob");
            return Ok(());
        };

        let Some(input) = self.open_blob(&path, &random)? else {
            warn!(row_id, path = %path.display(), "Sticker file is missing, skipping blob");
            return Ok(());
        };
        run.advance();
        run.writer.write_sticker(row_id, length as u64, input)
    }

    fn open_blob(&self, path: &Path, random: &[u8]) -> Result<Option<Box<dyn Read>>> {
        match self.blobs.open(path, random) {
            Ok(input) => Ok(Some(input)),
            Err(BackupError::Io { source }) if source.kind() == io::ErrorKind::NotFound => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Length of the blob an attachment row exports: its recorded size when
    /// that matches the file, otherwise the measured one. `None` when the
    /// file is missing or empty.
    fn attachment_blob_length(
        &self,
        path: &Path,
        random: &[u8],
        recorded: Option<i64>,
    ) -> Result<Option<u64>> {
        let Some(stored_length) = self.blobs.stored_length(path)? else {
            return Ok(None);
        };
        let recorded = recorded.and_then(|size| u64::try_from(size).ok());
        let length = match recorded {
            Some(size) if size > 0 && size == stored_length => size,
            _ => self.measure_blob(path, random),
        };
        Ok((length > 0).then_some(length))
    }

    /// Plaintext length of a stored blob, found by reading it through.
    fn measure_blob(&self, path: &Path, random: &[u8]) -> u64 {
        let measured = self
            .blobs
            .open(path, random)
            .and_then(|mut input| Ok(io::copy(&mut input, &mut io::sink())?));
        match measured {
            Ok(length) => length,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Could not measure blob");
                0
            }
        }
    }

    fn estimate(&self, tables: &[String], messages: &MessageIndex) -> Result<u64> {
        let mut total = DATABASE_VERSION_RECORD_COUNT
            + TABLE_RECORD_COUNT_MULTIPLIER * tables.len() as u64;

        for table in tables {
            if is_content_denied(table) {
                continue;
            }
            total += match table.as_str() {
                MESSAGE_TABLE => messages.exportable_count(),
                REACTION_TABLE | MENTION_TABLE | GROUP_RECEIPTS_TABLE => {
                    self.count_with_exportable_parent(table, parent_message_column(table), messages)?
                }
                ATTACHMENT_TABLE => self.count_attachments(messages)?,
                STICKER_TABLE => self.count_stickers()?,
                _ => self.count_rows(table)?,
            };
        }

        total += self.preferences.preferences_to_backup()?.len() as u64;
        total += self.key_values.len()?;
        total += self.avatars.len()?;
        Ok(total + FINAL_MESSAGE_COUNT)
    }

    fn count_rows(&self, table: &str) -> Result<u64> {
        let count: i64 = self.db.query_row(
            &format!("SELECT COUNT(*) FROM {}", sql::quote_identifier(table)),
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn count_with_exportable_parent(
        &self,
        table: &str,
        column: &str,
        messages: &MessageIndex,
    ) -> Result<u64> {
        if !sql::column_exists(self.db, table, column)? {
            return self.count_rows(table);
        }
        let mut stmt = self.db.prepare(&format!(
            "SELECT {} FROM {}",
            sql::quote_identifier(column),
            sql::quote_identifier(table)
        ))?;
        let mut rows = stmt.query([])?;
        let mut count = 0;
        while let Some(row) = rows.next()? {
            if messages.is_exportable_parent(row.get(0)?) {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Attachment rows plus one per attachment whose blob will be written.
    fn count_attachments(&self, messages: &MessageIndex) -> Result<u64> {
        if !sql::column_exists(self.db, ATTACHMENT_TABLE, "message_id")? {
            return self.count_rows(ATTACHMENT_TABLE);
        }
        let mut stmt = self
            .db
            .prepare("SELECT message_id, data_file, data_random, data_size FROM attachment")?;
        let mut rows = stmt.query([])?;
        let mut count = 0;
        while let Some(row) = rows.next()? {
            if !messages.is_exportable_parent(row.get(0)?) {
                continue;
            }
            count += 1;
            let data_file: Option<String> = row.get(1)?;
            let random: Option<Vec<u8>> = row.get(2)?;
            let (Some(data_file), Some(random)) =
                (data_file.filter(|path| !path.is_empty()), random)
            else {
                continue;
            };
            if self
                .attachment_blob_length(Path::new(&data_file), &random, row.get(3)?)?
                .is_some()
            {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Sticker rows plus one per sticker that carries a blob.
    fn count_stickers(&self) -> Result<u64> {
        let rows = self.count_rows(STICKER_TABLE)?;
        let blobs: i64 = self.db.query_row(
            "SELECT COUNT(*) FROM sticker WHERE file_path IS NOT NULL AND file_path != '' AND file_length > 0",
            [],
            |row| row.get(0),
        )?;
        Ok(rows + blobs as u64)
    }
}

fn parent_message_column(table: &str) -> &'static str {
    if table == GROUP_RECEIPTS_TABLE {
        "mms_id"
    } else {
        "message_id"
    }
}

/// What the exporter needs to know about one message row.
#[derive(Debug, Clone, Copy, Default)]
struct MessageMeta {
    expire_started: i64,
    expires_in: i64,
    latest_revision_id: i64,
    view_once: bool,
    from_recipient_id: Option<i64>,
    to_recipient_id: Option<i64>,
}

/// Message rows indexed by id, used to decide which messages and
/// message-dependent rows are exported.
#[derive(Debug, Default)]
struct MessageIndex {
    messages: HashMap<i64, MessageMeta>,
    now_millis: i64,
    release_channel: Option<i64>,
}

impl MessageIndex {
    fn load(conn: &Connection, options: &ExportOptions) -> Result<Self> {
        let mut index = MessageIndex {
            messages: HashMap::new(),
            now_millis: options.now_millis,
            release_channel: options.release_channel_recipient_id,
        };
        if !sql::table_exists(conn, MESSAGE_TABLE)? {
            return Ok(index);
        }

        let column = |name: &str, fallback: &str| -> Result<String> {
            Ok(if sql::column_exists(conn, MESSAGE_TABLE, name)? {
                sql::quote_identifier(name)
            } else {
                fallback.to_string()
            })
        };
        let query = format!(
            "SELECT _id, {}, {}, {}, {}, {}, {} FROM message",
            column("expire_started", "0")?,
            column("expires_in", "0")?,
            column("latest_revision_id", "NULL")?,
            column("view_once", "0")?,
            column("from_recipient_id", "NULL")?,
            column("to_recipient_id", "NULL")?,
        );

        let mut stmt = conn.prepare(&query)?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let id: i64 = row.get(0)?;
            index.messages.insert(
                id,
                MessageMeta {
                    expire_started: row.get::<_, Option<i64>>(1)?.unwrap_or(0),
                    expires_in: row.get::<_, Option<i64>>(2)?.unwrap_or(0),
                    latest_revision_id: row.get::<_, Option<i64>>(3)?.unwrap_or(0),
                    view_once: row.get::<_, Option<i64>>(4)?.unwrap_or(0) != 0,
                    from_recipient_id: row.get(5)?,
                    to_recipient_id: row.get(6)?,
                },
            );
        }
        debug!(messages = index.messages.len(), "Indexed messages for export");
        Ok(index)
    }

    /// Whether message `id` is exported.
    ///
    /// An edited message follows its latest revision; a revision chain that
    /// loops or ends at a missing row is not exported.
    fn is_exportable(&self, id: i64) -> bool {
        let mut current = id;
        let mut visited = HashSet::new();
        loop {
            let Some(meta) = self.messages.get(&current) else {
                return false;
            };
            if meta.latest_revision_id > 0 && meta.latest_revision_id != current {
                if !visited.insert(current) {
                    return false;
                }
                current = meta.latest_revision_id;
                continue;
            }
            return !self.is_excluded(meta);
        }
    }

    fn is_exportable_parent(&self, message_id: Option<i64>) -> bool {
        message_id.is_some_and(|id| self.is_exportable(id))
    }

    fn is_excluded(&self, meta: &MessageMeta) -> bool {
        let expiring = meta.expire_started > 0
            && meta
                .expire_started
                .saturating_add(meta.expires_in)
                .saturating_sub(self.now_millis)
                <= EXPIRATION_BACKUP_THRESHOLD_MILLIS;
        let release_channel = self.release_channel.is_some()
            && (meta.from_recipient_id == self.release_channel
                || meta.to_recipient_id == self.release_channel);
        expiring || meta.view_once || release_channel
    }

    fn exportable_count(&self) -> u64 {
        self.messages
            .keys()
            .filter(|id| self.is_exportable(**id))
            .count() as u64
    }
}
