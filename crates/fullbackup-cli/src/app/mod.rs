//! Shared plumbing for the commands: config resolution, passphrases and
//! opening the configured stores.

mod passphrase;
mod resolver;
mod stores;

pub use passphrase::{export_passphrase, import_passphrase, ExportPassphrase};
pub use resolver::{load_config, resolve_config_path};
pub use stores::Stores;
