//! Backup frame reader.

use std::io::{self, Read, Write};

use ctr::cipher::StreamCipher;

use super::blob::read_blob;
use super::frame::{decode_frame, decode_header, BackupFrame, MAX_HEADER_BYTES};
use super::{
    frame_length_encrypted, read_exact_or_truncated, CURRENT_VERSION, MAX_FRAME_BYTES,
    SALT_LENGTH,
};
use crate::crypto::{derive_backup_key, StreamCipherState, IV_LENGTH, MAC_LENGTH};
use crate::error::{BackupError, Result};

/// Reads and authenticates an encrypted backup stream frame by frame.
pub struct BackupFrameReader<R: Read> {
    input: R,
    state: StreamCipherState,
    version: u32,
    frames: u64,
}

impl<R: Read> BackupFrameReader<R> {
    /// Read the header from `input` and derive keys from `passphrase`.
    ///
    /// The passphrase is only checked when the first frame's MAC is verified.
    pub fn open(input: R, passphrase: &str) -> Result<Self> {
        Self::open_with_progress(input, passphrase, |_, _| {})
    }

    /// Like [`BackupFrameReader::open`], reporting key derivation rounds.
    pub fn open_with_progress<F>(mut input: R, passphrase: &str, on_key_progress: F) -> Result<Self>
    where
        F: FnMut(u32, u32),
    {
        let mut length_bytes = [0u8; 4];
        read_exact_or_truncated(&mut input, &mut length_bytes)?;
        let length = u32::from_be_bytes(length_bytes) as usize;
        if length == 0 || length > MAX_HEADER_BYTES {
            return Err(BackupError::MalformedFrame(format!(
                "Invalid header length {}",
                length
            )));
        }

        let mut header_bytes = vec![0u8; length];
        read_exact_or_truncated(&mut input, &mut header_bytes)?;
        let header = decode_header(&header_bytes)?;

        let version = header.version.unwrap_or(0);
        if version > CURRENT_VERSION {
            return Err(BackupError::UnsupportedVersion(version));
        }

        let iv: [u8; IV_LENGTH] = header.iv.as_slice().try_into().map_err(|_| {
            BackupError::MalformedFrame(format!("Header IV is {} bytes", header.iv.len()))
        })?;
        let salt = match header.salt.len() {
            0 => None,
            SALT_LENGTH => Some(header.salt.as_slice()),
            other => {
                return Err(BackupError::MalformedFrame(format!(
                    "Header salt is {} bytes",
                    other
                )))
            }
        };

        let key = derive_backup_key(passphrase, salt, on_key_progress);
        tracing::debug!(version, "Opened backup stream");

        Ok(Self {
            input,
            state: StreamCipherState::new(key.expand(), iv),
            version,
            frames: 0,
        })
    }

    /// Container format version declared by the header.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Frames read so far, not counting the header or blobs.
    pub fn frames_read(&self) -> u64 {
        self.frames
    }

    /// Read, authenticate and decode the next frame.
    ///
    /// After an `Attachment`, `Sticker` or `Avatar` frame the caller must
    /// consume its blob with [`BackupFrameReader::read_blob_to`] or
    /// [`BackupFrameReader::skip_blob`] before reading the next frame.
    pub fn read_frame(&mut self) -> Result<BackupFrame> {
        let mut segment = self.state.next_segment()?;

        let mut length_bytes = [0u8; 4];
        read_exact_or_truncated(&mut self.input, &mut length_bytes)?;
        if frame_length_encrypted(self.version) {
            segment.update_mac(&length_bytes);
            segment.apply_keystream(&mut length_bytes)?;
        }

        let length = u32::from_be_bytes(length_bytes) as usize;
        if !(MAC_LENGTH..=MAX_FRAME_BYTES).contains(&length) {
            return Err(BackupError::MalformedFrame(format!(
                "Invalid frame length {}",
                length
            )));
        }

        let mut body = vec![0u8; length];
        read_exact_or_truncated(&mut self.input, &mut body)?;
        let (ciphertext, their_mac) = body.split_at_mut(length - MAC_LENGTH);

        segment.update_mac(ciphertext);
        let mut cipher = segment.verify_mac(their_mac).ok_or(BackupError::BadMac)?;
        cipher
            .try_apply_keystream(ciphertext)
            .map_err(|e| BackupError::Crypto(format!("Stream cipher failed: {}", e)))?;

        let frame = decode_frame(ciphertext)?;
        self.frames += 1;
        Ok(frame)
    }

    /// Decrypt the blob that follows the last frame into `output`.
    pub fn read_blob_to<W: Write + ?Sized>(&mut self, length: u64, output: &mut W) -> Result<()> {
        read_blob(&mut self.state, &mut self.input, length, output)
    }

    /// Authenticate and discard the blob that follows the last frame.
    pub fn skip_blob(&mut self, length: u64) -> Result<()> {
        self.read_blob_to(length, &mut io::sink())
    }
}
