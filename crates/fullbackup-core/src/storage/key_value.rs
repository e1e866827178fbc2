//! SQLite-backed key-value store.
//!
//! Values are stored with a type tag so they come back with the type they
//! were written with.

use std::path::Path;

use rusqlite::types::{Value, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use tracing::warn;

use crate::error::{BackupError, Result};
use crate::format::{KeyValue, KeyValueData};

const TYPE_BLOB: i64 = 0;
const TYPE_BOOLEAN: i64 = 1;
const TYPE_FLOAT: i64 = 2;
const TYPE_INTEGER: i64 = 3;
const TYPE_LONG: i64 = 4;
const TYPE_STRING: i64 = 5;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS key_value (
    key TEXT PRIMARY KEY,
    value,
    type INTEGER NOT NULL
);
"#;

/// Key-value store held in its own SQLite database.
pub struct KeyValueStore {
    conn: Connection,
}

impl KeyValueStore {
    /// Open (creating if needed) the store at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    pub fn get(&self, key: &str) -> Result<Option<KeyValueData>> {
        get_value(&self.conn, key)
    }

    pub fn put(&self, key: &str, value: &KeyValueData) -> Result<()> {
        put_value(&self.conn, key, value)
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM key_value WHERE key = ?1", [key])?;
        Ok(())
    }

    /// Every entry with a value, sorted by key.
    pub fn data_set(&self) -> Result<Vec<KeyValue>> {
        let mut stmt = self
            .conn
            .prepare("SELECT key, value, type FROM key_value ORDER BY key")?;
        let mut rows = stmt.query([])?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            let key: String = row.get(0)?;
            let type_tag: i64 = row.get(2)?;
            let raw = row.get_ref(1)?;
            if matches!(raw, ValueRef::Null) {
                warn!(key = %key, type_tag, "Skipping key-value entry with a null value");
                continue;
            }
            let value = decode_value(&key, raw, type_tag)?;
            entries.push(KeyValue { key, value });
        }
        Ok(entries)
    }

    /// Entries with a value; the ones [`data_set`](Self::data_set) returns.
    pub fn len(&self) -> Result<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM key_value WHERE value IS NOT NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Begin a transaction; writes through it are discarded unless committed.
    pub fn transaction(&mut self) -> Result<KeyValueTransaction<'_>> {
        Ok(KeyValueTransaction {
            tx: self.conn.transaction()?,
        })
    }
}

/// Pending writes to a [`KeyValueStore`]; rolled back on drop.
pub struct KeyValueTransaction<'a> {
    tx: Transaction<'a>,
}

impl KeyValueTransaction<'_> {
    pub fn put(&self, key: &str, value: &KeyValueData) -> Result<()> {
        put_value(&self.tx, key, value)
    }

    pub fn get(&self, key: &str) -> Result<Option<KeyValueData>> {
        get_value(&self.tx, key)
    }

    pub fn commit(self) -> Result<()> {
        self.tx.commit()?;
        Ok(())
    }
}

fn get_value(conn: &Connection, key: &str) -> Result<Option<KeyValueData>> {
    let raw = conn
        .query_row(
            "SELECT value, type FROM key_value WHERE key = ?1",
            [key],
            |row| Ok((row.get::<_, Value>(0)?, row.get::<_, i64>(1)?)),
        )
        .optional()?;
    match raw {
        Some((Value::Null, _)) | None => Ok(None),
        Some((value, type_tag)) => Ok(Some(decode_value(key, (&value).into(), type_tag)?)),
    }
}

fn put_value(conn: &Connection, key: &str, value: &KeyValueData) -> Result<()> {
    let (stored, type_tag) = match value {
        KeyValueData::Blob(bytes) => (Value::Blob(bytes.clone()), TYPE_BLOB),
        KeyValueData::Boolean(b) => (Value::Integer(i64::from(*b)), TYPE_BOOLEAN),
        KeyValueData::Float(f) => (Value::Real(f64::from(*f)), TYPE_FLOAT),
        KeyValueData::Integer(i) => (Value::Integer(i64::from(*i)), TYPE_INTEGER),
        KeyValueData::Long(l) => (Value::Integer(*l), TYPE_LONG),
        KeyValueData::String(s) => (Value::Text(s.clone()), TYPE_STRING),
    };
    conn.execute(
        "INSERT OR REPLACE INTO key_value (key, value, type) VALUES (?1, ?2, ?3)",
        params![key, stored, type_tag],
    )?;
    Ok(())
}

fn decode_value(key: &str, value: ValueRef<'_>, type_tag: i64) -> Result<KeyValueData> {
    let mismatch = || {
        BackupError::Storage(format!(
            "Key-value entry {} has type {} but a {} value",
            key,
            type_tag,
            value.data_type()
        ))
    };
    let data = match (type_tag, value) {
        (TYPE_BLOB, ValueRef::Blob(b)) => KeyValueData::Blob(b.to_vec()),
        (TYPE_BOOLEAN, ValueRef::Integer(i)) => KeyValueData::Boolean(i != 0),
        (TYPE_FLOAT, ValueRef::Real(f)) => KeyValueData::Float(f as f32),
        (TYPE_FLOAT, ValueRef::Integer(i)) => KeyValueData::Float(i as f32),
        (TYPE_INTEGER, ValueRef::Integer(i)) => {
            KeyValueData::Integer(i32::try_from(i).map_err(|_| mismatch())?)
        }
        (TYPE_LONG, ValueRef::Integer(i)) => KeyValueData::Long(i),
        (TYPE_STRING, ValueRef::Text(t)) => {
            KeyValueData::String(String::from_utf8_lossy(t).into_owned())
        }
        _ => return Err(mismatch()),
    };
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_values_keep_their_type() {
        let store = KeyValueStore::open_in_memory().unwrap();
        let values = vec![
            ("a.blob", KeyValueData::Blob(vec![1, 2, 3])),
            ("b.bool", KeyValueData::Boolean(true)),
            ("c.float", KeyValueData::Float(0.25)),
            ("d.int", KeyValueData::Integer(-7)),
            ("e.long", KeyValueData::Long(1 << 40)),
            ("f.string", KeyValueData::String("hello".to_string())),
        ];
        for (key, value) in &values {
            store.put(key, value).unwrap();
        }

        for (key, value) in &values {
            assert_eq!(store.get(key).unwrap().as_ref(), Some(value));
        }
        assert_eq!(store.len().unwrap(), 6);
    }

    #[test]
    fn test_data_set_is_sorted_by_key() {
        let store = KeyValueStore::open_in_memory().unwrap();
        store.put("zeta", &KeyValueData::Long(1)).unwrap();
        store.put("alpha", &KeyValueData::Long(2)).unwrap();

        let keys: Vec<String> = store
            .data_set()
            .unwrap()
            .into_iter()
            .map(|kv| kv.key)
            .collect();
        assert_eq!(keys, vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_uncommitted_transaction_is_discarded() {
        let mut store = KeyValueStore::open_in_memory().unwrap();
        {
            let tx = store.transaction().unwrap();
            tx.put("pending", &KeyValueData::Boolean(true)).unwrap();
            assert!(tx.get("pending").unwrap().is_some());
        }
        assert_eq!(store.get("pending").unwrap(), None);

        let tx = store.transaction().unwrap();
        tx.put("kept", &KeyValueData::Boolean(false)).unwrap();
        tx.commit().unwrap();
        assert_eq!(
            store.get("kept").unwrap(),
            Some(KeyValueData::Boolean(false))
        );
    }

    #[test]
    fn test_put_replaces_and_remove_deletes() {
        let store = KeyValueStore::open_in_memory().unwrap();
        store.put("k", &KeyValueData::Integer(1)).unwrap();
        store
            .put("k", &KeyValueData::String("two".to_string()))
            .unwrap();
        assert_eq!(
            store.get("k").unwrap(),
            Some(KeyValueData::String("two".to_string()))
        );

        store.remove("k").unwrap();
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_null_values_are_skipped() {
        let store = KeyValueStore::open_in_memory().unwrap();
        store.put("kept", &KeyValueData::Long(3)).unwrap();
        store
            .conn
            .execute(
                "INSERT INTO key_value (key, value, type) VALUES ('empty', NULL, ?1)",
                [TYPE_STRING],
            )
            .unwrap();

        let keys: Vec<String> = store
            .data_set()
            .unwrap()
            .into_iter()
            .map(|kv| kv.key)
            .collect();
        assert_eq!(keys, vec!["kept"]);
        assert_eq!(store.len().unwrap(), 1);
        assert_eq!(store.get("empty").unwrap(), None);
    }

    #[test]
    fn test_mismatched_type_is_storage_error() {
        let store = KeyValueStore::open_in_memory().unwrap();
        store
            .conn
            .execute(
                "INSERT INTO key_value (key, value, type) VALUES ('bad', 'text', ?1)",
                [TYPE_LONG],
            )
            .unwrap();
        assert!(matches!(store.get("bad"), Err(BackupError::Storage(_))));
    }
}
