mod export;
mod import;
mod init;
mod verify;

pub use export::handle_export;
pub use import::handle_import;
pub use init::handle_init;
pub use verify::handle_verify;
