use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use fullbackup_core::VERSION;

/// Fullbackup - encrypted full-snapshot backups of an application's data
#[derive(Parser)]
#[command(name = "fullbackup")]
#[command(author, version = VERSION, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the config file
    #[arg(short, long, global = true, env = "FULLBACKUP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a config file and create the attachment secret
    Init {
        /// Directory holding the database and stores
        #[arg(long, value_name = "DIR")]
        data_dir: Option<PathBuf>,

        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },

    /// Export the database and stores to an encrypted backup file
    Export {
        /// Backup file to write
        #[arg(value_name = "DEST")]
        destination: PathBuf,

        /// Generate a random passphrase and print it
        #[arg(long)]
        generate_passphrase: bool,

        /// Overwrite the destination if it exists
        #[arg(long)]
        force: bool,
    },

    /// Replace the database and stores with the contents of a backup
    Import {
        /// Backup file to restore
        #[arg(value_name = "SRC")]
        source: PathBuf,

        /// Skip the verification pass before restoring
        #[arg(long)]
        no_verify: bool,

        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Decrypt and authenticate a backup without restoring it
    Verify {
        /// Backup file to check
        #[arg(value_name = "SRC")]
        source: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completions
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: Shell,
    },
}
