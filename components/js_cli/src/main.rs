//! Corten node CLI
//!
//! Entry point for the server. Captures the command line and delegates to
//! the [`Runtime`](js_cli::Runtime); option handling belongs to the server.

use clap::Parser as ClapParser;
use js_cli::{Cli, CliError, Runtime};
use server::ServerConfig;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn init_tracing() -> Result<(), CliError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init()
        .map_err(|e| CliError::Tracing(e.to_string()))
}

fn main() {
    if let Err(e) = init_tracing() {
        eprintln!("{}", e);
    }

    let cli = Cli::parse();
    let status = match Runtime::new(ServerConfig::from_env()).run(&cli.args) {
        Ok(status) => status,
        Err(e) => {
            eprintln!("{}", e);
            e.exit_code()
        }
    };
    std::process::exit(status);
}
