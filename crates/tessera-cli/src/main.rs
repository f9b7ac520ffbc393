//! tessera - command-line client for bearer-token APIs.
//!
//! A thin wrapper over `tessera-http`: it keeps a session on disk, renews
//! it when needed, and sends authenticated requests for manual exploration
//! and debugging of an API.

mod cli;
mod commands;
mod context;
mod output;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands};
use commands::{login, logout, refresh, request, status, whoami};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.json_logs);

    let session = context::connect(&cli.global).await?;
    let result = match cli.command {
        Commands::Login(args) => login::run(args, &session).await,
        Commands::Logout(args) => logout::run(args, &session).await,
        Commands::Whoami(args) => whoami::run(args, &session).await,
        Commands::Status(args) => status::run(args, &session).await,
        Commands::Refresh(args) => refresh::run(args, &session).await,
        Commands::Request(args) => request::run(args, &session).await,
    };
    session.dispose();
    result
}

fn init_logging(verbosity: u8, json: bool) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
    }
}
