//! Backup frame writer.

use std::io::{Read, Write};

use rand::rngs::OsRng;
use rand::RngCore;

use super::blob::write_blob;
use super::frame::{encode_frame, BackupFrame, Header, KeyValue, SharedPreference, SqlStatement};
use super::{frame_length_encrypted, CURRENT_VERSION, MAX_FRAME_BYTES, SALT_LENGTH};
use crate::crypto::{derive_backup_key, StreamCipherState, IV_LENGTH, MAC_LENGTH};
use crate::error::{BackupError, Result};

/// Writes an encrypted backup stream frame by frame.
///
/// The header is written by [`BackupFrameWriter::create`]; the caller then
/// writes frames in order and finishes with [`BackupFrameWriter::write_end`].
pub struct BackupFrameWriter<W: Write> {
    output: W,
    state: StreamCipherState,
    version: u32,
    frames: u64,
}

impl<W: Write> BackupFrameWriter<W> {
    /// Start a backup on `output` with a fresh salt and IV.
    pub fn create(output: W, passphrase: &str) -> Result<Self> {
        Self::create_with_progress(output, passphrase, |_, _| {})
    }

    /// Like [`BackupFrameWriter::create`], reporting key derivation rounds.
    pub fn create_with_progress<F>(mut output: W, passphrase: &str, on_key_progress: F) -> Result<Self>
    where
        F: FnMut(u32, u32),
    {
        let mut salt = [0u8; SALT_LENGTH];
        let mut iv = [0u8; IV_LENGTH];
        OsRng.fill_bytes(&mut salt);
        OsRng.fill_bytes(&mut iv);

        let key = derive_backup_key(passphrase, Some(salt.as_slice()), on_key_progress);

        let header = encode_frame(&BackupFrame::Header(Header {
            iv: iv.to_vec(),
            salt: salt.to_vec(),
            version: Some(CURRENT_VERSION),
        }))?;
        let header_length = u32::try_from(header.len())
            .map_err(|_| BackupError::MalformedFrame("Header too large".to_string()))?;
        output.write_all(&header_length.to_be_bytes())?;
        output.write_all(&header)?;

        Ok(Self {
            output,
            state: StreamCipherState::new(key.expand(), iv),
            version: CURRENT_VERSION,
            frames: 0,
        })
    }

    pub fn write_database_version(&mut self, version: i64) -> Result<()> {
        self.write_frame(&BackupFrame::DatabaseVersion { version })
    }

    pub fn write_statement(&mut self, statement: SqlStatement) -> Result<()> {
        self.write_frame(&BackupFrame::Statement(statement))
    }

    pub fn write_preference(&mut self, preference: SharedPreference) -> Result<()> {
        self.write_frame(&BackupFrame::Preference(preference))
    }

    pub fn write_key_value(&mut self, key_value: KeyValue) -> Result<()> {
        self.write_frame(&BackupFrame::KeyValue(key_value))
    }

    /// Write an attachment frame followed by exactly `length` bytes from `input`.
    pub fn write_attachment<R: Read>(&mut self, row_id: i64, length: u64, input: R) -> Result<()> {
        self.write_frame(&BackupFrame::Attachment { row_id, length })?;
        self.write_blob_checked(length, input)
    }

    /// Write a sticker frame followed by exactly `length` bytes from `input`.
    pub fn write_sticker<R: Read>(&mut self, row_id: i64, length: u64, input: R) -> Result<()> {
        self.write_frame(&BackupFrame::Sticker { row_id, length })?;
        self.write_blob_checked(length, input)
    }

    /// Write an avatar frame followed by exactly `length` bytes from `input`.
    pub fn write_avatar<R: Read>(
        &mut self,
        name: &str,
        recipient_id: Option<&str>,
        length: u64,
        input: R,
    ) -> Result<()> {
        self.write_frame(&BackupFrame::Avatar {
            name: name.to_string(),
            recipient_id: recipient_id.map(str::to_string),
            length,
        })?;
        self.write_blob_checked(length, input)
    }

    /// Write the terminating frame and flush.
    pub fn write_end(&mut self) -> Result<()> {
        self.write_frame(&BackupFrame::End)?;
        self.flush()
    }

    /// Frames written so far, not counting the header or blobs.
    pub fn frames_written(&self) -> u64 {
        self.frames
    }

    /// Counter value the next frame or blob will use.
    pub fn counter(&self) -> u32 {
        self.state.counter()
    }

    pub fn flush(&mut self) -> Result<()> {
        self.output.flush()?;
        Ok(())
    }

    /// Flush and hand back the underlying output.
    pub fn finish(mut self) -> Result<W> {
        self.flush()?;
        Ok(self.output)
    }

    fn write_frame(&mut self, frame: &BackupFrame) -> Result<()> {
        if matches!(frame, BackupFrame::Header(_)) {
            return Err(BackupError::InvalidInput(
                "Header is written only when the backup is created".to_string(),
            ));
        }

        let mut body = encode_frame(frame)?;
        let length = body.len() + MAC_LENGTH;
        if length > MAX_FRAME_BYTES {
            return Err(BackupError::MalformedFrame(format!(
                "{} frame of {} bytes exceeds the frame size limit",
                frame.kind(),
                length
            )));
        }
        let mut length_bytes = (length as u32).to_be_bytes();

        let mut segment = self.state.next_segment()?;
        if frame_length_encrypted(self.version) {
            segment.encrypt(&mut length_bytes)?;
        }
        segment.encrypt(&mut body)?;
        let mac = segment.finalize_mac();

        self.output.write_all(&length_bytes)?;
        self.output.write_all(&body)?;
        self.output.write_all(&mac)?;
        self.frames += 1;
        Ok(())
    }

    fn write_blob_checked<R: Read>(&mut self, length: u64, input: R) -> Result<()> {
        let copied = write_blob(&mut self.state, input, &mut self.output)?;
        if copied != length {
            return Err(BackupError::SizeMismatch {
                expected: length,
                actual: copied,
            });
        }
        Ok(())
    }
}
