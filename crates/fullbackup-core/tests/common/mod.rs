#![allow(dead_code)]

use std::io::{Read, Write};
use std::path::PathBuf;

use fullbackup_core::export::{BackupExporter, ExportOptions};
use fullbackup_core::format::{KeyValueData, PreferenceValue};
use fullbackup_core::import::BackupImporter;
use fullbackup_core::storage::{
    AvatarStore, BlobStore, EncryptedBlobStore, JsonPreferenceStore, KeyValueStore,
};
use rusqlite::{params, Connection};
use tempfile::TempDir;

pub const PASSPHRASE: &str = "54321 09876 54321 09876 54321 09876";

/// Clock used for every export in these tests.
pub const NOW: i64 = 1_700_000_000_000;
pub const HOUR: i64 = 60 * 60 * 1000;

/// Recipient whose messages are left out of exports.
pub const RELEASE_CHANNEL: i64 = 77;

pub const SCHEMA_VERSION: i64 = 5;

pub const SCHEMA: &str = r#"
CREATE TABLE thread (_id INTEGER PRIMARY KEY AUTOINCREMENT, title TEXT);
CREATE TABLE recipient (_id INTEGER PRIMARY KEY, e164 TEXT UNIQUE);
CREATE TABLE message (
    _id INTEGER PRIMARY KEY,
    thread_id INTEGER REFERENCES thread(_id),
    from_recipient_id INTEGER REFERENCES recipient(_id),
    to_recipient_id INTEGER REFERENCES recipient(_id),
    body TEXT,
    expire_started INTEGER DEFAULT 0,
    expires_in INTEGER DEFAULT 0,
    latest_revision_id INTEGER,
    view_once INTEGER DEFAULT 0
);
CREATE TABLE reaction (
    _id INTEGER PRIMARY KEY,
    message_id INTEGER REFERENCES message(_id),
    emoji TEXT
);
CREATE TABLE mention (
    _id INTEGER PRIMARY KEY,
    message_id INTEGER REFERENCES message(_id),
    recipient_id INTEGER REFERENCES recipient(_id)
);
CREATE TABLE group_receipts (
    _id INTEGER PRIMARY KEY,
    mms_id INTEGER REFERENCES message(_id),
    status INTEGER
);
CREATE TABLE attachment (
    _id INTEGER PRIMARY KEY,
    message_id INTEGER REFERENCES message(_id),
    data_file TEXT,
    data_size INTEGER,
    data_random BLOB
);
CREATE TABLE sticker (
    _id INTEGER PRIMARY KEY,
    file_path TEXT,
    file_length INTEGER,
    file_random BLOB
);
CREATE TABLE sessions (_id INTEGER PRIMARY KEY, record BLOB);
CREATE VIRTUAL TABLE message_fts USING fts5(body);
CREATE INDEX message_thread_index ON message(thread_id);
CREATE VIEW thread_titles AS SELECT title FROM thread;
CREATE TRIGGER thread_cleanup AFTER DELETE ON thread BEGIN
    DELETE FROM message WHERE thread_id = old._id;
END;
"#;

/// A database with its companion stores, all under one temp directory.
pub struct Stores {
    pub dir: TempDir,
    pub db: Connection,
    pub key_values: KeyValueStore,
    pub preferences: JsonPreferenceStore,
    pub blobs: EncryptedBlobStore,
    pub avatars: AvatarStore,
}

impl Stores {
    /// Empty stores; `secret` seeds the at-rest blob encryption key.
    pub fn new(secret: u8) -> Self {
        let dir = TempDir::new().expect("tempdir should be created");
        let db = Connection::open(dir.path().join("app.db")).expect("db should open");
        let key_values =
            KeyValueStore::open(&dir.path().join("key_value.db")).expect("kv store should open");
        let preferences = JsonPreferenceStore::new(dir.path().join("shared_prefs"));
        let blobs = EncryptedBlobStore::new(dir.path().join("attachments"), [secret; 32]);
        let avatars = AvatarStore::new(dir.path().join("avatars"));
        Self {
            dir,
            db,
            key_values,
            preferences,
            blobs,
            avatars,
        }
    }

    /// Stores holding the full test data set.
    pub fn seeded() -> Self {
        let stores = Self::new(1);
        stores.seed();
        stores
    }

    /// An empty target whose schema version accepts backups of the seeded data.
    pub fn target() -> Self {
        let stores = Self::new(2);
        stores
            .db
            .pragma_update(None, "user_version", SCHEMA_VERSION)
            .expect("user_version should be set");
        stores
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
            release_channel_recipient_id: Some(RELEASE_CHANNEL),
            now_millis: NOW,
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

    pub fn attachments_dir(&self) -> PathBuf {
        self.dir.path().join("attachments")
    }

    /// Files currently in the attachments directory.
    pub fn blob_file_count(&self) -> usize {
        std::fs::read_dir(self.attachments_dir())
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    /// Store `data` as a new blob, returning its path and random.
    pub fn store_blob(&self, data: &[u8]) -> (String, Vec<u8>) {
        let mut blob = self.blobs.create().expect("blob should be created");
        blob.writer.write_all(data).expect("blob should be written");
        blob.writer.flush().expect("blob should flush");
        (blob.path.to_string_lossy().into_owned(), blob.random)
    }

    pub fn read_blob(&self, path: &str, random: &[u8]) -> Vec<u8> {
        let mut plaintext = Vec::new();
        self.blobs
            .open(std::path::Path::new(path), random)
            .expect("blob should open")
            .read_to_end(&mut plaintext)
            .expect("blob should read");
        plaintext
    }

    pub fn seed(&self) {
        self.db.execute_batch(SCHEMA).expect("schema should apply");
        self.db
            .pragma_update(None, "user_version", SCHEMA_VERSION)
            .expect("user_version should be set");

        self.db
            .execute_batch(
                r#"
                INSERT INTO thread (title) VALUES ('family'), ('work');
                INSERT INTO recipient VALUES (1, '+15550001'), (2, '+15550002'), (77, NULL);
                INSERT INTO sessions VALUES (1, x'deadbeef');
                INSERT INTO message_fts (body) VALUES ('hello world');
                "#,
            )
            .expect("rows should insert");

        let message = |id: i64, thread: i64, from: i64, body: &str, started: i64, expires: i64, view_once: i64| {
            self.db
                .execute(
                    "INSERT INTO message (_id, thread_id, from_recipient_id, to_recipient_id, body, expire_started, expires_in, view_once)
                     VALUES (?1, ?2, ?3, 1, ?4, ?5, ?6, ?7)",
                    params![id, thread, from, body, started, expires, view_once],
                )
                .expect("message should insert");
        };
        // 1: plain; 2: expires within the hour; 3: view-once; 4: from the release channel;
        // 5: expires in two days.
        message(1, 1, 2, "hi", 0, 0, 0);
        message(2, 1, 2, "soon gone", NOW - HOUR, 2 * HOUR, 0);
        message(3, 2, 2, "once", 0, 0, 1);
        message(4, 2, RELEASE_CHANNEL, "release notes", 0, 0, 0);
        message(5, 2, 2, "later", NOW, 48 * HOUR, 0);

        self.db
            .execute_batch(
                r#"
                INSERT INTO reaction VALUES (1, 1, 'heart'), (2, 2, 'thumbs');
                INSERT INTO mention VALUES (1, 1, 2), (2, 3, 2);
                INSERT INTO group_receipts VALUES (1, 5, 2), (2, 4, 2);
                "#,
            )
            .expect("child rows should insert");

        let (photo_path, photo_random) = self.store_blob(b"photo bytes");
        let (gone_path, gone_random) = self.store_blob(b"expiring photo");
        let (resized_path, resized_random) = self.store_blob(b"resized since the row was written");
        self.db
            .execute(
                "INSERT INTO attachment VALUES (1, 1, ?1, 11, ?2)",
                params![photo_path, photo_random],
            )
            .expect("attachment should insert");
        self.db
            .execute(
                "INSERT INTO attachment VALUES (2, 2, ?1, 14, ?2)",
                params![gone_path, gone_random],
            )
            .expect("attachment should insert");
        self.db
            .execute(
                "INSERT INTO attachment VALUES (3, 5, ?1, 3, ?2)",
                params![resized_path, resized_random],
            )
            .expect("attachment should insert");
        self.db
            .execute("INSERT INTO attachment VALUES (4, 5, NULL, 0, NULL)", [])
            .expect("attachment should insert");

        let (sticker_path, sticker_random) = self.store_blob(b"sticker!");
        self.db
            .execute(
                "INSERT INTO sticker VALUES (1, ?1, 8, ?2)",
                params![sticker_path, sticker_random],
            )
            .expect("sticker should insert");

        self.key_values
            .put("settings.theme", &KeyValueData::String("dark".to_string()))
            .expect("kv should insert");
        self.key_values
            .put("account.registered", &KeyValueData::Boolean(true))
            .expect("kv should insert");
        self.key_values
            .put("account.pin_attempts", &KeyValueData::Integer(3))
            .expect("kv should insert");

        let mut preferences = self.preferences.clone();
        preferences
            .set("settings", "notifications", PreferenceValue::Boolean(true))
            .expect("preference should be set");
        preferences
            .set(
                "settings",
                "ringtone",
                PreferenceValue::String("chime".to_string()),
            )
            .expect("preference should be set");

        self.avatars
            .create("2")
            .expect("avatar should be created")
            .1
            .write_all(b"avatar of two")
            .expect("avatar should be written");
    }

    pub fn ids(&self, table: &str) -> Vec<i64> {
        let mut stmt = self
            .db
            .prepare(&format!("SELECT _id FROM {} ORDER BY _id", table))
            .expect("select should prepare");
        stmt.query_map([], |row| row.get(0))
            .expect("select should run")
            .collect::<Result<Vec<i64>, _>>()
            .expect("ids should read")
    }

    pub fn count(&self, table: &str) -> i64 {
        self.db
            .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                row.get(0)
            })
            .expect("count should run")
    }
}
