//! Rules for which schema objects and rows take part in a backup.

use std::collections::BTreeSet;

use rusqlite::Connection;

use crate::error::Result;
use crate::sql;

/// Tables whose schema is exported but whose rows are not.
///
/// These hold device-bound key material, rebuildable search indexes, or
/// state that is only meaningful on the device that produced it.
pub const TABLE_CONTENT_DENY_LIST: &[&str] = &[
    "signed_prekeys",
    "one_time_prekeys",
    "sessions",
    "message_fts",
    "emoji_search",
    "sender_keys",
    "sender_key_shared",
    "pending_retry_receipts",
    "avatar_picker",
    "remapped_recipients",
    "remapped_threads",
];

/// Name prefixes of FTS shadow tables, for databases that predate `PRAGMA table_list`.
pub const FTS_SHADOW_PREFIXES: &[&str] = &["message_fts_", "emoji_search_"];

const INTERNAL_TABLE_PREFIX: &str = "sqlite_";

/// Decides which tables and schema objects are exported.
#[derive(Debug, Clone, Default)]
pub struct SchemaFilter {
    shadow_tables: BTreeSet<String>,
}

impl SchemaFilter {
    /// Build a filter from the shadow tables SQLite reports for `conn`.
    pub fn load(conn: &Connection) -> Result<Self> {
        Ok(Self {
            shadow_tables: sql::shadow_table_names(conn)?,
        })
    }

    pub fn is_shadow_table(&self, name: &str) -> bool {
        self.shadow_tables.contains(name)
            || FTS_SHADOW_PREFIXES
                .iter()
                .any(|prefix| name.starts_with(prefix))
    }

    /// Whether a table (or a schema object of that name) belongs in a backup.
    pub fn is_table_allowed(&self, name: &str) -> bool {
        !name.starts_with(INTERNAL_TABLE_PREFIX) && !self.is_shadow_table(name)
    }
}

/// Whether a table's rows are left out of a backup.
pub fn is_content_denied(table: &str) -> bool {
    TABLE_CONTENT_DENY_LIST.contains(&table)
}

/// Whether an imported statement must be skipped because SQLite manages
/// the object it creates.
pub fn is_skipped_statement(statement: &str) -> bool {
    let lower = statement.to_ascii_lowercase();
    lower.starts_with("create table sqlite_")
        || FTS_SHADOW_PREFIXES
            .iter()
            .any(|prefix| lower.contains(prefix))
}
