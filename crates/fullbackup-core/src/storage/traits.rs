//! Storage collaborator traits.
//!
//! Export and import never touch preference files or attachment blobs
//! directly; they go through these traits so the at-rest format stays the
//! owner's concern.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::format::SharedPreference;

/// Source and sink for the application's shared preferences.
pub trait PreferenceStore {
    /// Every preference that belongs in a backup, in a stable order.
    fn preferences_to_backup(&self) -> Result<Vec<SharedPreference>>;

    /// Write one preference from a backup, replacing any existing value.
    fn restore(&mut self, preference: &SharedPreference) -> Result<()>;
}

/// A blob being written by [`BlobStore::create`].
pub struct NewBlob {
    /// Where the blob lives; stored in the owning database row
    pub path: PathBuf,
    /// Per-blob random value; stored alongside `path`
    pub random: Vec<u8>,
    /// Accepts plaintext and stores it in the at-rest format
    pub writer: Box<dyn Write>,
}

impl std::fmt::Debug for NewBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewBlob")
            .field("path", &self.path)
            .field("random", &"[REDACTED]")
            .finish()
    }
}

/// At-rest storage for attachment and sticker blobs.
///
/// Implementations must ensure:
/// - `open` yields exactly the plaintext that was written through `create`
/// - Each blob gets its own `random`, so equal plaintexts are stored differently
pub trait BlobStore {
    /// Open a stored blob for reading plaintext.
    ///
    /// # Errors
    ///
    /// Returns `BackupError::Io` with `NotFound` if the file is missing.
    fn open(&self, path: &Path, random: &[u8]) -> Result<Box<dyn Read>>;

    /// Plaintext length of a stored blob, or `None` if its file is missing.
    fn stored_length(&self, path: &Path) -> Result<Option<u64>>;

    /// Start a new blob.
    fn create(&self) -> Result<NewBlob>;

    /// Delete a blob; deleting a missing blob is not an error.
    fn remove(&self, path: &Path) -> Result<()>;
}
