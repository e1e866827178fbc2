//! Stores that a backup reads from and restores into, besides the main database.
//!
//! - **key_value**: typed key-value entries in their own SQLite database
//! - **preferences**: shared preferences, one JSON file per preference file
//! - **blobs**: attachment and sticker files, encrypted at rest
//! - **avatars**: profile avatar files named by recipient id

pub mod avatars;
pub mod blobs;
pub mod key_value;
pub mod preferences;
pub mod traits;

pub use avatars::{AvatarFile, AvatarStore};
pub use blobs::EncryptedBlobStore;
pub use key_value::{KeyValueStore, KeyValueTransaction};
pub use preferences::JsonPreferenceStore;
pub use traits::{BlobStore, NewBlob, PreferenceStore};
