//! Read-only backup verification.
//!
//! Decrypts and authenticates every frame and blob in a backup without
//! touching any store, so a backup can be checked before it is trusted
//! with an import.

use std::io::{BufReader, Read};

use tracing::{info, warn};

use crate::error::{BackupError, Result};
use crate::format::{BackupFrame, BackupFrameReader};
use crate::progress::{BackupEvent, BackupPhase, ProgressListener};

/// What a verification pass found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifySummary {
    /// Frames read, including the final `End`
    pub frames: u64,
    /// Blobs that authenticated
    pub blobs: u64,
    /// Blobs whose MAC did not match; an import drops these
    pub bad_blobs: u64,
    pub database_version: Option<i64>,
    pub statements: u64,
    pub preferences: u64,
    pub key_values: u64,
}

/// Authenticate a whole backup.
///
/// Fails on the first frame-level problem (`BadMac`, `Truncated`,
/// `MalformedFrame`). Blobs that fail their MAC are counted rather than
/// fatal, matching what an import would do with them.
pub fn verify_backup<R: Read>(
    input: R,
    passphrase: &str,
    progress: &dyn ProgressListener,
) -> Result<VerifySummary> {
    let mut reader = BackupFrameReader::open(BufReader::new(input), passphrase)?;
    let mut summary = VerifySummary::default();

    loop {
        let frame = reader.read_frame()?;
        summary.frames += 1;
        progress.on_event(BackupEvent::new(BackupPhase::Verifying, summary.frames, 0));

        match &frame {
            BackupFrame::End => break,
            BackupFrame::Header(_) => {
                return Err(BackupError::MalformedFrame(
                    "Header frame after start of backup".to_string(),
                ))
            }
            BackupFrame::DatabaseVersion { version } => summary.database_version = Some(*version),
            BackupFrame::Statement(_) => summary.statements += 1,
            BackupFrame::Preference(_) => summary.preferences += 1,
            BackupFrame::KeyValue(_) => summary.key_values += 1,
            BackupFrame::Attachment { .. } | BackupFrame::Sticker { .. } | BackupFrame::Avatar { .. } => {}
        }

        if let Some(length) = frame.blob_length() {
            match reader.skip_blob(length) {
                Ok(()) => summary.blobs += 1,
                Err(BackupError::BlobBadMac) => {
                    warn!(kind = frame.kind(), length, "Blob failed authentication");
                    summary.bad_blobs += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    info!(
        frames = summary.frames,
        blobs = summary.blobs,
        bad_blobs = summary.bad_blobs,
        "Backup verified"
    );
    progress.on_event(BackupEvent::new(BackupPhase::Finished, summary.frames, 0));
    Ok(summary)
}
