//! Backup key derivation.
//!
//! The backup key is derived from the passphrase with iterated SHA-512 and
//! then expanded with HKDF-SHA256 into the cipher and MAC keys used by every
//! frame and blob of one backup.

use hkdf::Hkdf;
use sha2::{Digest, Sha256, Sha512};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use super::passphrase::normalize_passphrase;

/// Number of SHA-512 rounds applied to the passphrase.
///
/// Chosen to make offline brute-forcing of a backup file costly.
pub const KEY_DERIVATION_ROUNDS: u32 = 250_000;

/// Progress is reported every this many rounds.
pub const KEY_PROGRESS_INTERVAL: u32 = 1_000;

/// Length of the backup key, and of each expanded key, in bytes.
pub const KEY_LENGTH: usize = 32;

const HKDF_INFO: &[u8] = b"Backup Export";

/// A 32-byte key derived from a backup passphrase.
///
/// Zeroized from memory when dropped.
#[derive(Clone, ZeroizeOnDrop)]
pub struct BackupKey {
    key: [u8; KEY_LENGTH],
}

impl BackupKey {
    pub(crate) fn from_bytes(bytes: [u8; KEY_LENGTH]) -> Self {
        Self { key: bytes }
    }

    /// Get a reference to the raw key bytes.
    ///
    /// # Security
    ///
    /// Avoid storing or logging this value.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }

    /// Expand the backup key into the cipher key and MAC key.
    ///
    /// HKDF-SHA256 with an all-zero salt and the info string `"Backup Export"`,
    /// 64 output bytes: the first half keys AES, the second half keys HMAC.
    pub fn expand(&self) -> BackupSecrets {
        let hk = Hkdf::<Sha256>::new(None, &self.key);
        let mut okm = Zeroizing::new([0u8; KEY_LENGTH * 2]);
        hk.expand(HKDF_INFO, &mut okm[..])
            .expect("64 bytes is a valid HKDF-SHA256 output length");

        let mut cipher_key = [0u8; KEY_LENGTH];
        let mut mac_key = [0u8; KEY_LENGTH];
        cipher_key.copy_from_slice(&okm[..KEY_LENGTH]);
        mac_key.copy_from_slice(&okm[KEY_LENGTH..]);

        BackupSecrets {
            cipher_key,
            mac_key,
        }
    }
}

impl std::fmt::Debug for BackupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupKey")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Cipher and MAC keys expanded from a [`BackupKey`].
#[derive(Clone, ZeroizeOnDrop)]
pub struct BackupSecrets {
    pub(crate) cipher_key: [u8; KEY_LENGTH],
    pub(crate) mac_key: [u8; KEY_LENGTH],
}

impl BackupSecrets {
    pub fn cipher_key(&self) -> &[u8; KEY_LENGTH] {
        &self.cipher_key
    }

    pub fn mac_key(&self) -> &[u8; KEY_LENGTH] {
        &self.mac_key
    }
}

impl std::fmt::Debug for BackupSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupSecrets")
            .field("cipher_key", &"[REDACTED]")
            .field("mac_key", &"[REDACTED]")
            .finish()
    }
}

/// Derive a backup key from a passphrase and salt.
///
/// Spaces are stripped from the passphrase first, so a passphrase displayed
/// in groups derives the same key as its compact form. The digest is seeded
/// with the salt, then each of [`KEY_DERIVATION_ROUNDS`] rounds computes
/// `SHA-512(previous || passphrase)`, where "previous" starts as the
/// passphrase itself. The final digest is truncated to 32 bytes.
///
/// `on_progress(completed, total)` is called every [`KEY_PROGRESS_INTERVAL`]
/// rounds and once more on completion.
///
/// # Examples
///
/// ```
/// use fullbackup_core::crypto::derive_backup_key;
///
/// let key = derive_backup_key("1234 5678 9012", Some(b"salt".as_slice()), |_, _| {});
/// let same = derive_backup_key("123456789012", Some(b"salt".as_slice()), |_, _| {});
/// assert_eq!(key.as_bytes(), same.as_bytes());
/// ```
pub fn derive_backup_key<F>(passphrase: &str, salt: Option<&[u8]>, mut on_progress: F) -> BackupKey
where
    F: FnMut(u32, u32),
{
    let input = normalize_passphrase(passphrase);
    let input = input.as_bytes();

    let mut digest = Sha512::new();
    if let Some(salt) = salt {
        digest.update(salt);
    }

    on_progress(0, KEY_DERIVATION_ROUNDS);
    digest.update(input);
    digest.update(input);
    let mut hash = digest.finalize_reset();

    for round in 1..KEY_DERIVATION_ROUNDS {
        if round % KEY_PROGRESS_INTERVAL == 0 {
            on_progress(round, KEY_DERIVATION_ROUNDS);
        }
        digest.update(hash);
        digest.update(input);
        hash = digest.finalize_reset();
    }
    on_progress(KEY_DERIVATION_ROUNDS, KEY_DERIVATION_ROUNDS);

    let mut key = [0u8; KEY_LENGTH];
    key.copy_from_slice(&hash[..KEY_LENGTH]);
    hash.as_mut_slice().zeroize();

    BackupKey::from_bytes(key)
}
