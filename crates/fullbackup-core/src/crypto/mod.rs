//! Cryptographic operations for backups.
//!
//! Built on RustCrypto primitives:
//! - **SHA-512** (250,000 rounds) turns the passphrase and salt into a backup key
//! - **HKDF-SHA256** expands that key into a cipher key and a MAC key
//! - **AES-256-CTR** encrypts every frame and blob
//! - **HMAC-SHA256**, truncated to 10 bytes, authenticates them
//!
//! ## Security Model
//!
//! - Each frame and blob is encrypted under a fresh IV drawn from one counter
//! - MACs are checked in constant time before anything is decrypted
//! - Key material is zeroized from memory on drop
//! - Passphrases are never written anywhere
//!
//! ## Threat Model
//!
//! We defend against:
//! - Theft of a backup file
//! - Tampering with, truncating or reordering backup contents
//!
//! We do NOT defend against:
//! - Weak passphrases chosen by the user
//! - Compromised OS / keylogger

pub mod key;
pub mod passphrase;
pub mod stream;

pub use key::{derive_backup_key, BackupKey, BackupSecrets};
pub use passphrase::{
    format_passphrase, generate_passphrase, normalize_passphrase, validate_passphrase,
};
pub use stream::{StreamCipherState, IV_LENGTH, MAC_LENGTH};
