//! Backup container format.
//!
//! ## Layout
//!
//! ```text
//! [u32 BE length][Header]                      plaintext
//! [u32 BE length][ciphertext][10-byte MAC]     one per frame
//! [ciphertext][10-byte MAC]                    after Attachment/Sticker/Avatar
//! ...
//! [u32 BE length][End][10-byte MAC]
//! ```
//!
//! From format version 1 the frame length is itself encrypted and covered by
//! the frame MAC. Every frame and blob is encrypted under its own IV taken
//! from [`crate::crypto::StreamCipherState`].

use std::io::{self, Read};

use crate::error::{BackupError, Result};

pub(crate) mod blob;
pub mod frame;
pub mod reader;
pub mod writer;

pub use frame::{
    BackupFrame, Header, KeyValue, KeyValueData, PreferenceValue, SharedPreference,
    SqlParameter, SqlStatement,
};
pub use reader::BackupFrameReader;
pub use writer::BackupFrameWriter;

/// Format version written by this build.
pub const CURRENT_VERSION: u32 = 1;

/// Largest frame (ciphertext plus MAC) a reader will accept.
pub const MAX_FRAME_BYTES: usize = 128 * 1024 * 1024;

/// Chunk size used when streaming blobs.
pub(crate) const BLOB_CHUNK_SIZE: usize = 8 * 1024;

/// Random salt length written into new headers.
pub(crate) const SALT_LENGTH: usize = 32;

/// Whether frames of `version` carry an encrypted, authenticated length prefix.
pub fn frame_length_encrypted(version: u32) -> bool {
    version >= 1
}

/// `read_exact` that reports a short stream as [`BackupError::Truncated`].
pub(crate) fn read_exact_or_truncated<R: Read + ?Sized>(input: &mut R, buf: &mut [u8]) -> Result<()> {
    input.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => BackupError::Truncated,
        _ => BackupError::from(e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_encryption_starts_at_version_one() {
        assert!(!frame_length_encrypted(0));
        assert!(frame_length_encrypted(1));
        assert!(frame_length_encrypted(CURRENT_VERSION));
    }

    #[test]
    fn test_short_read_is_truncated() {
        let mut input: &[u8] = &[1, 2];
        let mut buf = [0u8; 4];
        assert!(matches!(
            read_exact_or_truncated(&mut input, &mut buf),
            Err(BackupError::Truncated)
        ));
    }
}
