//! Fullbackup CLI - encrypted full-snapshot backups
//!
//! Command-line front end for the fullbackup core library: export the
//! configured database and stores to a backup file, verify a backup, and
//! restore one.

mod app;
mod cli;
mod commands;
mod config;
mod constants;
mod errors;
mod ui;

use clap::{CommandFactory, Parser};
use clap_complete::generate;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use cli::{Cli, Commands};
use constants::{DEFAULT_LOG_FILTER, LOG_ENV};
use errors::CliError;

fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var(LOG_ENV).unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(&cli) {
        if let Some(cli_err) = e.downcast_ref::<CliError>() {
            cli_err.exit();
        }
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    match &cli.command {
        Commands::Init { data_dir, force } => {
            commands::handle_init(cli, data_dir.as_deref(), *force)
        }
        Commands::Export {
            destination,
            generate_passphrase,
            force,
        } => commands::handle_export(cli, destination, *generate_passphrase, *force),
        Commands::Import {
            source,
            no_verify,
            yes,
        } => commands::handle_import(cli, source, *no_verify, *yes),
        Commands::Verify { source, json } => commands::handle_verify(cli, source, *json),
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(*shell, &mut cmd, "fullbackup", &mut std::io::stdout());
            Ok(())
        }
    }
}
