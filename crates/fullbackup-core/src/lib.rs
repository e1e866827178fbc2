//! # Fullbackup Core
//!
//! Full-snapshot encrypted backups of an application's SQLite database,
//! key-value store, preferences, attachment blobs and avatars.
//!
//! This crate provides the container format, export, import and
//! verification logic independent of the CLI interface.
//!
//! ## Architecture
//!
//! - **crypto**: passphrase key derivation and the per-frame stream cipher
//! - **format**: frame types, wire encoding, frame reader and writer
//! - **export**: database and stores to backup stream
//! - **import**: backup stream to database and stores
//! - **verify**: authenticate a backup without restoring it
//! - **schema** / **sql** / **order**: which tables go in, and in what order
//! - **storage**: key-value, preference, blob and avatar stores

pub mod crypto;
pub mod error;
pub mod export;
pub mod format;
pub mod fs;
pub mod import;
pub mod order;
pub mod progress;
pub mod schema;
pub mod sql;
pub mod storage;
pub mod verify;

pub use error::{BackupError, ForeignKeyViolation, Result};
pub use export::{BackupExporter, ExportOptions};
pub use format::{BackupFrame, BackupFrameReader, BackupFrameWriter};
pub use import::BackupImporter;
pub use progress::{
    BackupEvent, BackupPhase, CancellationSignal, NeverCancel, NoProgress, ProgressListener,
};
pub use storage::{
    AvatarStore, BlobStore, EncryptedBlobStore, JsonPreferenceStore, KeyValueStore,
    PreferenceStore,
};
pub use verify::{verify_backup, VerifySummary};

/// Core version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
