mod common;

use std::cell::Cell;
use std::io::{Read, Write};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use common::{Stores, PASSPHRASE, SCHEMA_VERSION};
use fullbackup_core::format::{
    BackupFrame, BackupFrameReader, BackupFrameWriter, KeyValue, KeyValueData, PreferenceValue,
    SharedPreference, SqlParameter, SqlStatement,
};
use fullbackup_core::progress::{BackupEvent, BackupPhase, NeverCancel, NoProgress};
use fullbackup_core::storage::PreferenceStore;
use fullbackup_core::{sql, BackupError, BackupImporter};

/// Length of an encoded `End` frame on the wire: length prefix, one byte, MAC.
const END_FRAME_BYTES: usize = 4 + 1 + 10;

fn export(source: &Stores) -> Vec<u8> {
    let mut bytes = Vec::new();
    source
        .exporter()
        .export(&mut bytes, PASSPHRASE, &NeverCancel, &NoProgress)
        .expect("export should succeed");
    bytes
}

fn statement(sql: &str, parameters: Vec<SqlParameter>) -> SqlStatement {
    SqlStatement {
        statement: sql.to_string(),
        parameters,
    }
}

/// A target that already holds data an aborted import must leave alone.
fn populated_target(version: i64) -> Stores {
    let target = Stores::new(2);
    target
        .db
        .execute_batch(
            r#"
            CREATE TABLE keep_me (_id INTEGER PRIMARY KEY, note TEXT);
            INSERT INTO keep_me VALUES (1, 'precious');
            "#,
        )
        .unwrap();
    target
        .db
        .pragma_update(None, "user_version", version)
        .unwrap();
    target
        .key_values
        .put("existing", &KeyValueData::Long(42))
        .unwrap();
    target
}

fn assert_untouched(target: &Stores, version: i64) {
    assert_eq!(target.ids("keep_me"), vec![1]);
    assert!(!sql::table_exists(&target.db, "message").unwrap());
    assert_eq!(sql::user_version(&target.db).unwrap(), version);
    assert_eq!(
        target.key_values.data_set().unwrap(),
        vec![KeyValue {
            key: "existing".to_string(),
            value: KeyValueData::Long(42),
        }]
    );
    assert_eq!(target.blob_file_count(), 0);
    assert!(target.avatars.is_empty().unwrap());
    assert!(target.preferences.preferences_to_backup().unwrap().is_empty());
}

#[test]
fn test_tampered_frame_aborts_import_without_changes() {
    let source = Stores::seeded();
    let mut bytes = export(&source);
    let last = bytes.len() - 1;
    bytes[last] ^= 0x80;

    let mut target = populated_target(SCHEMA_VERSION);
    let result = target
        .importer()
        .import(bytes.as_slice(), PASSPHRASE, &NoProgress);

    assert!(matches!(result, Err(BackupError::BadMac)));
    assert_untouched(&target, SCHEMA_VERSION);
    let foreign_keys: i64 = target
        .db
        .pragma_query_value(None, "foreign_keys", |row| row.get(0))
        .unwrap();
    assert_eq!(foreign_keys, 1);
}

#[test]
fn test_truncated_backup_is_rejected() {
    let source = Stores::seeded();
    let mut bytes = export(&source);
    bytes.truncate(bytes.len() - 5);

    let mut target = populated_target(SCHEMA_VERSION);
    let result = target
        .importer()
        .import(bytes.as_slice(), PASSPHRASE, &NoProgress);

    assert!(matches!(result, Err(BackupError::Truncated)));
    assert_untouched(&target, SCHEMA_VERSION);
}

#[test]
fn test_newer_backup_is_a_downgrade_and_writes_nothing() {
    let source = Stores::seeded();
    let bytes = export(&source);

    let mut target = populated_target(SCHEMA_VERSION - 1);
    let result = target
        .importer()
        .import(bytes.as_slice(), PASSPHRASE, &NoProgress);

    match result {
        Err(BackupError::DatabaseDowngrade { current, backup }) => {
            assert_eq!(current, SCHEMA_VERSION - 1);
            assert_eq!(backup, SCHEMA_VERSION);
        }
        other => panic!("expected downgrade, got {:?}", other),
    }
    assert_untouched(&target, SCHEMA_VERSION - 1);
}

#[test]
fn test_wrong_passphrase_touches_nothing() {
    let source = Stores::seeded();
    let bytes = export(&source);

    let mut target = populated_target(SCHEMA_VERSION);
    let result = target.importer().import(
        bytes.as_slice(),
        "11111 22222 33333 44444 55555 66666",
        &NoProgress,
    );

    assert!(result.is_err());
    assert_untouched(&target, SCHEMA_VERSION);
}

#[test]
fn test_cancelled_export_stops_after_the_current_row() {
    let source = Stores::seeded();
    let rows_written = Cell::new(0u64);
    let listener = |event: BackupEvent| {
        if event.phase == BackupPhase::Exporting {
            rows_written.set(rows_written.get() + 1);
        }
    };
    let cancel = || rows_written.get() >= 3;

    let mut bytes = Vec::new();
    let result = source
        .exporter()
        .export(&mut bytes, PASSPHRASE, &cancel, &listener);
    assert!(matches!(result, Err(BackupError::Cancelled)));

    // What was written before the cancel is intact and readable.
    let mut reader = BackupFrameReader::open(bytes.as_slice(), PASSPHRASE).unwrap();
    let mut inserts = 0;
    let end = loop {
        match reader.read_frame() {
            Ok(BackupFrame::Statement(statement)) if statement.statement.starts_with("INSERT") => {
                inserts += 1
            }
            Ok(BackupFrame::End) => panic!("cancelled export must not be terminated"),
            Ok(frame) => {
                if let Some(length) = frame.blob_length() {
                    reader.skip_blob(length).unwrap();
                }
            }
            Err(e) => break e,
        }
    };
    assert_eq!(inserts, 3);
    assert!(matches!(end, BackupError::Truncated));
}

#[test]
fn test_cancelled_export_to_file_leaves_nothing_behind() {
    let source = Stores::seeded();
    let out_dir = tempfile::tempdir().unwrap();
    let path = out_dir.path().join("signal.backup");

    let result = source
        .exporter()
        .export_to_file(&path, PASSPHRASE, &|| true, &NoProgress);

    assert!(matches!(result, Err(BackupError::Cancelled)));
    assert_eq!(std::fs::read_dir(out_dir.path()).unwrap().count(), 0);
}

#[test]
fn test_foreign_key_violations_are_listed_and_rolled_back() {
    let mut writer = BackupFrameWriter::create(Vec::new(), PASSPHRASE).unwrap();
    writer.write_database_version(1).unwrap();
    writer
        .write_statement(SqlStatement::bare("CREATE TABLE parent (_id INTEGER PRIMARY KEY)"))
        .unwrap();
    writer
        .write_statement(SqlStatement::bare(
            "CREATE TABLE child (_id INTEGER PRIMARY KEY, parent_id INTEGER REFERENCES parent(_id))",
        ))
        .unwrap();
    writer
        .write_statement(statement(
            "INSERT INTO \"child\" VALUES (?,?)",
            vec![SqlParameter::Integer(7), SqlParameter::Integer(99)],
        ))
        .unwrap();
    writer.write_end().unwrap();
    let bytes = writer.finish().unwrap();

    let mut target = populated_target(1);
    let result = target
        .importer()
        .import(bytes.as_slice(), PASSPHRASE, &NoProgress);

    match result {
        Err(BackupError::ForeignKeyViolation(violations)) => {
            assert_eq!(violations.len(), 1);
            assert_eq!(violations[0].table, "child");
            assert_eq!(violations[0].column, "parent_id");
            assert_eq!(violations[0].row_id, Some(7));
            assert_eq!(violations[0].parent, "parent");
        }
        other => panic!("expected foreign key violation, got {:?}", other),
    }
    assert_eq!(target.ids("keep_me"), vec![1]);
    assert!(!sql::table_exists(&target.db, "child").unwrap());
}

#[test]
fn test_violations_on_msl_tables_are_ignored() {
    let mut writer = BackupFrameWriter::create(Vec::new(), PASSPHRASE).unwrap();
    writer.write_database_version(1).unwrap();
    writer
        .write_statement(SqlStatement::bare("CREATE TABLE message (_id INTEGER PRIMARY KEY)"))
        .unwrap();
    writer
        .write_statement(SqlStatement::bare(
            "CREATE TABLE msl_message (_id INTEGER PRIMARY KEY, message_id INTEGER REFERENCES message(_id))",
        ))
        .unwrap();
    writer
        .write_statement(statement(
            "INSERT INTO \"msl_message\" VALUES (?,?)",
            vec![SqlParameter::Integer(1), SqlParameter::Integer(404)],
        ))
        .unwrap();
    writer.write_end().unwrap();
    let bytes = writer.finish().unwrap();

    let mut target = Stores::new(2);
    target
        .db
        .pragma_update(None, "user_version", 1)
        .unwrap();
    target
        .importer()
        .import(bytes.as_slice(), PASSPHRASE, &NoProgress)
        .expect("msl violations should not block import");
    assert_eq!(target.ids("msl_message"), vec![1]);
}

#[test]
fn test_blob_with_bad_mac_is_dropped_and_import_continues() {
    let mut writer = BackupFrameWriter::create(Vec::new(), PASSPHRASE).unwrap();
    writer.write_database_version(1).unwrap();
    writer
        .write_statement(SqlStatement::bare(
            "CREATE TABLE attachment (_id INTEGER PRIMARY KEY, message_id INTEGER, data_file TEXT, data_size INTEGER, data_random BLOB)",
        ))
        .unwrap();
    writer
        .write_statement(statement(
            "INSERT INTO \"attachment\" VALUES (?,?,?,?,?)",
            vec![
                SqlParameter::Integer(1),
                SqlParameter::Integer(1),
                SqlParameter::String("/elsewhere/part1.mms".to_string()),
                SqlParameter::Integer(6),
                SqlParameter::Blob(vec![9; 32]),
            ],
        ))
        .unwrap();
    writer
        .write_key_value(KeyValue {
            key: "after.blob".to_string(),
            value: KeyValueData::Boolean(true),
        })
        .unwrap();
    writer.write_attachment(1, 6, &b"pixels"[..]).unwrap();
    writer.write_end().unwrap();
    let mut bytes = writer.finish().unwrap();

    // Last byte of the blob's MAC trailer, just before the End frame.
    let index = bytes.len() - END_FRAME_BYTES - 1;
    bytes[index] ^= 0x01;

    let mut target = Stores::new(2);
    target
        .db
        .pragma_update(None, "user_version", 1)
        .unwrap();
    target
        .importer()
        .import(bytes.as_slice(), PASSPHRASE, &NoProgress)
        .expect("a bad blob should not fail the import");

    let (data_file, data_random): (Option<String>, Option<Vec<u8>>) = target
        .db
        .query_row(
            "SELECT data_file, data_random FROM attachment WHERE _id = 1",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap();
    assert_eq!(data_file, None);
    assert_eq!(data_random, None);
    assert_eq!(target.blob_file_count(), 0);
    assert_eq!(
        target.key_values.get("after.blob").unwrap(),
        Some(KeyValueData::Boolean(true))
    );
}

#[test]
fn test_avatar_with_bad_mac_is_dropped() {
    let mut writer = BackupFrameWriter::create(Vec::new(), PASSPHRASE).unwrap();
    writer.write_database_version(0).unwrap();
    writer.write_avatar("4", Some("4"), 5, &b"smile"[..]).unwrap();
    writer.write_end().unwrap();
    let mut bytes = writer.finish().unwrap();
    let index = bytes.len() - END_FRAME_BYTES - 1;
    bytes[index] ^= 0x01;

    let mut target = Stores::new(2);
    target
        .importer()
        .import(bytes.as_slice(), PASSPHRASE, &NoProgress)
        .expect("a bad avatar should not fail the import");
    assert!(target.avatars.is_empty().unwrap());
}

/// A backup whose avatar `2` is followed by a row that breaks a foreign key.
fn avatar_backup_with_orphan_row() -> Vec<u8> {
    let mut writer = BackupFrameWriter::create(Vec::new(), PASSPHRASE).unwrap();
    writer.write_database_version(1).unwrap();
    writer
        .write_statement(SqlStatement::bare("CREATE TABLE parent (_id INTEGER PRIMARY KEY)"))
        .unwrap();
    writer
        .write_statement(SqlStatement::bare(
            "CREATE TABLE child (_id INTEGER PRIMARY KEY, parent_id INTEGER REFERENCES parent(_id))",
        ))
        .unwrap();
    writer.write_avatar("2", Some("2"), 8, &b"replaced"[..]).unwrap();
    writer
        .write_statement(statement(
            "INSERT INTO \"child\" VALUES (?,?)",
            vec![SqlParameter::Integer(1), SqlParameter::Integer(99)],
        ))
        .unwrap();
    writer.write_end().unwrap();
    writer.finish().unwrap()
}

fn avatar_contents(target: &Stores, name: &str) -> String {
    let mut contents = String::new();
    target
        .avatars
        .open(name)
        .unwrap()
        .read_to_string(&mut contents)
        .unwrap();
    contents
}

#[test]
fn test_failed_import_keeps_existing_avatar() {
    let bytes = avatar_backup_with_orphan_row();
    let mut target = populated_target(1);
    target
        .avatars
        .create("2")
        .unwrap()
        .1
        .write_all(b"precious avatar")
        .unwrap();

    let result = target
        .importer()
        .import(bytes.as_slice(), PASSPHRASE, &NoProgress);

    assert!(matches!(result, Err(BackupError::ForeignKeyViolation(_))));
    assert_eq!(avatar_contents(&target, "2"), "precious avatar");
    assert_eq!(
        std::fs::read_dir(target.avatars.dir()).unwrap().count(),
        1,
        "no staged avatar should be left behind"
    );
}

#[test]
fn test_imported_avatar_replaces_existing_one() {
    let mut writer = BackupFrameWriter::create(Vec::new(), PASSPHRASE).unwrap();
    writer.write_database_version(0).unwrap();
    writer.write_avatar("2", Some("2"), 8, &b"replaced"[..]).unwrap();
    writer.write_end().unwrap();
    let bytes = writer.finish().unwrap();

    let mut target = Stores::new(2);
    target
        .avatars
        .create("2")
        .unwrap()
        .1
        .write_all(b"precious avatar")
        .unwrap();
    target
        .importer()
        .import(bytes.as_slice(), PASSPHRASE, &NoProgress)
        .expect("import should succeed");

    assert_eq!(avatar_contents(&target, "2"), "replaced");
    assert_eq!(std::fs::read_dir(target.avatars.dir()).unwrap().count(), 1);
}

/// Refuses every write, as if the preferences directory were read-only.
struct ReadOnlyPreferences;

impl PreferenceStore for ReadOnlyPreferences {
    fn preferences_to_backup(&self) -> Result<Vec<SharedPreference>, BackupError> {
        Ok(Vec::new())
    }

    fn restore(&mut self, _preference: &SharedPreference) -> Result<(), BackupError> {
        Err(BackupError::Storage("preferences are read-only".to_string()))
    }
}

#[test]
fn test_failure_after_commit_keeps_restored_blobs() {
    let source = Stores::seeded();
    let bytes = export(&source);

    let mut target = Stores::target();
    let mut preferences = ReadOnlyPreferences;
    let result = BackupImporter::new(
        &mut target.db,
        &mut target.key_values,
        &mut preferences,
        &target.blobs,
        &target.avatars,
    )
    .import(bytes.as_slice(), PASSPHRASE, &NoProgress);

    assert!(matches!(result, Err(BackupError::Storage(_))));
    assert_eq!(target.ids("attachment"), vec![1, 3, 4]);
    assert_eq!(target.blob_file_count(), 3);
    let (path, random): (String, Vec<u8>) = target
        .db
        .query_row(
            "SELECT data_file, data_random FROM attachment WHERE _id = 1",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap();
    assert_eq!(target.read_blob(&path, &random), b"photo bytes");
    assert_eq!(avatar_contents(&target, "2"), "avatar of two");
}

#[test]
fn test_legacy_identity_preferences_land_in_key_value_store() {
    let mut writer = BackupFrameWriter::create(Vec::new(), PASSPHRASE).unwrap();
    writer.write_database_version(0).unwrap();
    writer
        .write_preference(SharedPreference {
            file: "SecureSMS-Preferences".to_string(),
            key: "pref_identity_public_v3".to_string(),
            value: PreferenceValue::String(STANDARD.encode([5u8; 33])),
        })
        .unwrap();
    writer
        .write_preference(SharedPreference {
            file: "SecureSMS-Preferences".to_string(),
            key: "pref_identity_private_v3".to_string(),
            value: PreferenceValue::String(STANDARD.encode([6u8; 32])),
        })
        .unwrap();
    writer
        .write_preference(SharedPreference {
            file: "SecureSMS-Preferences".to_string(),
            key: "pref_theme".to_string(),
            value: PreferenceValue::String("light".to_string()),
        })
        .unwrap();
    writer.write_end().unwrap();
    let bytes = writer.finish().unwrap();

    let mut target = Stores::new(2);
    target
        .importer()
        .import(bytes.as_slice(), PASSPHRASE, &NoProgress)
        .expect("import should succeed");

    assert_eq!(
        target
            .key_values
            .get("account.aci_identity_public_key")
            .unwrap(),
        Some(KeyValueData::Blob(vec![5; 33]))
    );
    assert_eq!(
        target
            .key_values
            .get("account.aci_identity_private_key")
            .unwrap(),
        Some(KeyValueData::Blob(vec![6; 32]))
    );
    let preferences = target.preferences.preferences_to_backup().unwrap();
    assert_eq!(preferences.len(), 1);
    assert_eq!(preferences[0].key, "pref_theme");
}

#[test]
fn test_import_reports_progress_every_hundred_frames() {
    let mut writer = BackupFrameWriter::create(Vec::new(), PASSPHRASE).unwrap();
    writer.write_database_version(0).unwrap();
    writer
        .write_statement(SqlStatement::bare("CREATE TABLE item (_id INTEGER PRIMARY KEY)"))
        .unwrap();
    for id in 0..248 {
        writer
            .write_statement(statement(
                "INSERT INTO \"item\" VALUES (?)",
                vec![SqlParameter::Integer(id)],
            ))
            .unwrap();
    }
    writer.write_end().unwrap();
    let bytes = writer.finish().unwrap();

    let events = std::cell::RefCell::new(Vec::new());
    let listener = |event: BackupEvent| events.borrow_mut().push((event.phase, event.count));

    let mut target = Stores::new(2);
    target
        .importer()
        .import(bytes.as_slice(), PASSPHRASE, &listener)
        .expect("import should succeed");

    assert_eq!(
        events.into_inner(),
        vec![
            (BackupPhase::Importing, 100),
            (BackupPhase::Importing, 200),
            (BackupPhase::Finished, 251),
        ]
    );
    assert_eq!(target.count("item"), 248);
}
