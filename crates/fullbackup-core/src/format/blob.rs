//! Encrypted blob streaming.
//!
//! A blob follows its Attachment, Sticker or Avatar frame directly. It is
//! encrypted under the next IV in the stream, with an HMAC that covers the
//! IV and then the ciphertext, truncated to 10 bytes and appended as a
//! trailer.

use std::io::{self, Read, Write};

use super::{read_exact_or_truncated, BLOB_CHUNK_SIZE};
use crate::crypto::{StreamCipherState, MAC_LENGTH};
use crate::error::{BackupError, Result};

/// Encrypt everything `input` yields into `output`, then write the MAC trailer.
///
/// Returns the number of plaintext bytes copied; the caller compares this
/// with the length it declared in the preceding frame.
pub(crate) fn write_blob<R, W>(
    state: &mut StreamCipherState,
    mut input: R,
    output: &mut W,
) -> Result<u64>
where
    R: Read,
    W: Write + ?Sized,
{
    let mut segment = state.next_segment()?;
    let iv = segment.iv();
    segment.update_mac(&iv);

    let mut buf = [0u8; BLOB_CHUNK_SIZE];
    let mut copied: u64 = 0;
    loop {
        let read = match input.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        segment.encrypt(&mut buf[..read])?;
        output.write_all(&buf[..read])?;
        copied += read as u64;
    }

    output.write_all(&segment.finalize_mac())?;
    Ok(copied)
}

/// Decrypt a blob of `length` bytes from `input` into `output` and check its trailer.
///
/// Plaintext reaches `output` before the MAC is known, so on
/// [`BackupError::BlobBadMac`] the caller must discard what was written.
pub(crate) fn read_blob<R, W>(
    state: &mut StreamCipherState,
    input: &mut R,
    length: u64,
    output: &mut W,
) -> Result<()>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    let mut segment = state.next_segment()?;
    let iv = segment.iv();
    segment.update_mac(&iv);

    let mut buf = [0u8; BLOB_CHUNK_SIZE];
    let mut remaining = length;
    while remaining > 0 {
        let chunk = remaining.min(BLOB_CHUNK_SIZE as u64) as usize;
        read_exact_or_truncated(input, &mut buf[..chunk])?;
        segment.update_mac(&buf[..chunk]);
        segment.apply_keystream(&mut buf[..chunk])?;
        output.write_all(&buf[..chunk])?;
        remaining -= chunk as u64;
    }

    let mut trailer = [0u8; MAC_LENGTH];
    read_exact_or_truncated(input, &mut trailer)?;
    match segment.verify_mac(&trailer) {
        Some(_) => Ok(()),
        None => Err(BackupError::BlobBadMac),
    }
}
