//! Running stream-cipher state shared by every frame and blob of a backup.
//!
//! Each frame or blob ("segment") gets its own IV: the first four bytes of
//! the header IV are replaced with a big-endian counter that is incremented
//! once per segment. The counter is owned here and never handed out for
//! callers to manipulate, so an IV is never reused under the same key.

use aes::Aes256;
use ctr::cipher::{KeyIvInit, StreamCipher};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use super::key::BackupSecrets;
use crate::error::{BackupError, Result};

/// AES-256 in CTR mode with a 128-bit big-endian block counter.
pub type Aes256Ctr = ctr::Ctr128BE<Aes256>;

type HmacSha256 = Hmac<Sha256>;

/// Length of the IV carried in the backup header.
pub const IV_LENGTH: usize = 16;

/// Number of HMAC-SHA256 bytes kept after each frame and blob.
pub const MAC_LENGTH: usize = 10;

/// Segments available before the counter would repeat.
const COUNTER_SPACE: u64 = 1 << 32;

/// Cipher keys plus the IV/counter sequence for one backup stream.
pub struct StreamCipherState {
    secrets: BackupSecrets,
    iv: [u8; IV_LENGTH],
    counter: u32,
    remaining: u64,
}

impl StreamCipherState {
    /// Start a stream from expanded keys and the header IV.
    ///
    /// The counter starts at the big-endian value of the IV's first four bytes.
    pub fn new(secrets: BackupSecrets, iv: [u8; IV_LENGTH]) -> Self {
        let counter = u32::from_be_bytes([iv[0], iv[1], iv[2], iv[3]]);
        Self {
            secrets,
            iv,
            counter,
            remaining: COUNTER_SPACE,
        }
    }

    /// Counter value the next segment will use.
    pub fn counter(&self) -> u32 {
        self.counter
    }

    /// Claim the next counter value and key a cipher and MAC for one segment.
    ///
    /// The counter advances before the segment is written, and is never
    /// rolled back even if writing the segment fails.
    pub(crate) fn next_segment(&mut self) -> Result<SegmentCipher> {
        if self.remaining == 0 {
            return Err(BackupError::Crypto(
                "Backup IV counter exhausted".to_string(),
            ));
        }
        let counter = self.counter;
        self.counter = counter.wrapping_add(1);
        self.remaining -= 1;

        self.iv[..4].copy_from_slice(&counter.to_be_bytes());
        let cipher = Aes256Ctr::new(
            (&self.secrets.cipher_key).into(),
            (&self.iv).into(),
        );
        let mac = <HmacSha256 as Mac>::new_from_slice(&self.secrets.mac_key)
            .map_err(|e| BackupError::Crypto(format!("HMAC init failed: {}", e)))?;

        Ok(SegmentCipher {
            cipher,
            mac,
            iv: self.iv,
        })
    }
}

/// Cipher and MAC for a single frame or blob.
pub(crate) struct SegmentCipher {
    cipher: Aes256Ctr,
    mac: HmacSha256,
    iv: [u8; IV_LENGTH],
}

impl SegmentCipher {
    pub(crate) fn iv(&self) -> [u8; IV_LENGTH] {
        self.iv
    }

    /// Counter this segment was keyed with; the IV's first four bytes.
    #[cfg(test)]
    pub(crate) fn counter(&self) -> u32 {
        u32::from_be_bytes([self.iv[0], self.iv[1], self.iv[2], self.iv[3]])
    }

    /// XOR the next keystream bytes into `buf`.
    ///
    /// Fails instead of producing fewer bytes than given; a short keystream
    /// would desynchronize every following segment.
    pub(crate) fn apply_keystream(&mut self, buf: &mut [u8]) -> Result<()> {
        self.cipher
            .try_apply_keystream(buf)
            .map_err(|e| BackupError::Crypto(format!("Stream cipher failed: {}", e)))
    }

    pub(crate) fn update_mac(&mut self, data: &[u8]) {
        self.mac.update(data);
    }

    /// Encrypt `buf` in place and feed the ciphertext to the MAC.
    pub(crate) fn encrypt(&mut self, buf: &mut [u8]) -> Result<()> {
        self.apply_keystream(buf)?;
        self.mac.update(buf);
        Ok(())
    }

    /// Finish the MAC, truncated to [`MAC_LENGTH`] bytes.
    pub(crate) fn finalize_mac(self) -> [u8; MAC_LENGTH] {
        let tag = self.mac.finalize().into_bytes();
        let mut truncated = [0u8; MAC_LENGTH];
        truncated.copy_from_slice(&tag[..MAC_LENGTH]);
        truncated
    }

    /// Compare our truncated MAC with the one read from the stream in constant time.
    ///
    /// Returns the cipher so the caller can decrypt only after verification.
    pub(crate) fn verify_mac(self, theirs: &[u8]) -> Option<Aes256Ctr> {
        let SegmentCipher { cipher, mac, .. } = self;
        let tag = mac.finalize().into_bytes();
        bool::from(tag[..MAC_LENGTH].ct_eq(theirs)).then_some(cipher)
    }
}
