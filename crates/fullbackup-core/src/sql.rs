//! SQLite introspection and statement helpers shared by export and import.

use std::collections::{BTreeMap, BTreeSet};

use rusqlite::types::{ToSqlOutput, Value, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Row, ToSql};

use crate::error::{ForeignKeyViolation, Result};
use crate::format::{SqlParameter, SqlStatement};

/// An entry of `sqlite_master`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaObject {
    /// `table`, `index`, `trigger` or `view`
    pub kind: String,
    pub name: String,
    pub sql: Option<String>,
}

pub fn schema_objects(conn: &Connection) -> Result<Vec<SchemaObject>> {
    let mut stmt = conn.prepare("SELECT type, name, sql FROM sqlite_master ORDER BY rowid")?;
    let objects = stmt
        .query_map([], |row| {
            Ok(SchemaObject {
                kind: row.get(0)?,
                name: row.get(1)?,
                sql: row.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(objects)
}

fn names_of_kind(conn: &Connection, kind: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM sqlite_master WHERE type = ?1 ORDER BY name")?;
    let names = stmt
        .query_map([kind], |row| row.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;
    Ok(names)
}

/// All table names, sorted, including internal `sqlite_*` tables.
pub fn table_names(conn: &Connection) -> Result<Vec<String>> {
    names_of_kind(conn, "table")
}

pub fn trigger_names(conn: &Connection) -> Result<Vec<String>> {
    names_of_kind(conn, "trigger")
}

pub fn view_names(conn: &Connection) -> Result<Vec<String>> {
    names_of_kind(conn, "view")
}

/// Names of FTS shadow tables, as reported by `PRAGMA table_list`.
pub fn shadow_table_names(conn: &Connection) -> Result<BTreeSet<String>> {
    let mut stmt =
        conn.prepare("SELECT name FROM pragma_table_list WHERE schema = 'main' AND type = 'shadow'")?;
    let names = stmt
        .query_map([], |row| row.get(0))?
        .collect::<std::result::Result<BTreeSet<String>, _>>()?;
    Ok(names)
}

pub fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

pub fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM pragma_table_info(?1) WHERE name = ?2",
            params![table, column],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Tables referenced by `table`'s foreign keys, sorted and deduplicated.
pub fn foreign_key_parents(conn: &Connection, table: &str) -> Result<BTreeSet<String>> {
    let mut stmt = conn.prepare("SELECT \"table\" FROM pragma_foreign_key_list(?1)")?;
    let parents = stmt
        .query_map([table], |row| row.get(0))?
        .collect::<std::result::Result<BTreeSet<String>, _>>()?;
    Ok(parents)
}

/// Map each of `tables` to the tables it references.
pub fn dependency_map(
    conn: &Connection,
    tables: &[String],
) -> Result<BTreeMap<String, BTreeSet<String>>> {
    let mut dependencies = BTreeMap::new();
    for table in tables {
        dependencies.insert(table.clone(), foreign_key_parents(conn, table)?);
    }
    Ok(dependencies)
}

pub fn user_version(conn: &Connection) -> Result<i64> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}

pub fn set_user_version(conn: &Connection, version: i64) -> Result<()> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}

pub fn set_foreign_keys(conn: &Connection, enabled: bool) -> Result<()> {
    conn.pragma_update(None, "foreign_keys", enabled)?;
    Ok(())
}

/// Every row reported by `PRAGMA foreign_key_check`, with the child column resolved.
pub fn foreign_key_violations(conn: &Connection) -> Result<Vec<ForeignKeyViolation>> {
    let mut stmt = conn.prepare("PRAGMA foreign_key_check")?;
    let raw = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<i64>>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut columns_of = conn
        .prepare("SELECT \"from\" FROM pragma_foreign_key_list(?1) WHERE id = ?2 ORDER BY seq")?;
    let mut violations = Vec::with_capacity(raw.len());
    for (table, row_id, parent, fk_id) in raw {
        let columns = columns_of
            .query_map(params![table, fk_id], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        violations.push(ForeignKeyViolation {
            table,
            column: columns.join(","),
            row_id,
            parent,
        });
    }
    Ok(violations)
}

pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Build `INSERT INTO "table" VALUES (?,...)` bound to the current row's values.
pub fn insert_statement(table: &str, row: &Row<'_>, columns: usize) -> Result<SqlStatement> {
    let mut parameters = Vec::with_capacity(columns);
    for index in 0..columns {
        parameters.push(SqlParameter::from(row.get_ref(index)?));
    }
    let placeholders = vec!["?"; columns].join(",");
    Ok(SqlStatement {
        statement: format!(
            "INSERT INTO {} VALUES ({})",
            quote_identifier(table),
            placeholders
        ),
        parameters,
    })
}

/// Table named by an `INSERT INTO` statement, with identifier quotes removed.
pub fn insert_target(statement: &str) -> Option<String> {
    const PREFIX: &str = "INSERT INTO ";
    let head = statement.get(..PREFIX.len())?;
    if !head.eq_ignore_ascii_case(PREFIX) {
        return None;
    }
    let rest = statement[PREFIX.len()..].trim_start();
    if let Some(quoted) = rest.strip_prefix('"') {
        let end = quoted.find('"')?;
        return Some(quoted[..end].to_string());
    }
    let end = rest
        .find(|c: char| c.is_whitespace() || c == '(')
        .unwrap_or(rest.len());
    Some(rest[..end].to_string())
}

impl From<ValueRef<'_>> for SqlParameter {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => SqlParameter::Null,
            ValueRef::Integer(i) => SqlParameter::Integer(i),
            ValueRef::Real(f) => SqlParameter::Double(f),
            // SQLite does not enforce UTF-8; keep such text byte for byte.
            ValueRef::Text(t) => match std::str::from_utf8(t) {
                Ok(text) => SqlParameter::String(text.to_string()),
                Err(_) => SqlParameter::Blob(t.to_vec()),
            },
            ValueRef::Blob(b) => SqlParameter::Blob(b.to_vec()),
        }
    }
}

impl ToSql for SqlParameter {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlParameter::String(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            SqlParameter::Double(f) => ToSqlOutput::Owned(Value::Real(*f)),
            SqlParameter::Integer(i) => ToSqlOutput::Owned(Value::Integer(*i)),
            SqlParameter::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
            SqlParameter::Null => ToSqlOutput::Owned(Value::Null),
        })
    }
}
