//! CLI argument definitions.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::commands::{login, logout, refresh, request, status, whoami};

/// Session-aware client for bearer-token APIs.
#[derive(Parser, Debug)]
#[command(name = "tessera")]
#[command(author, version = env!("TESSERA_VERSION"), about, long_about = None)]
pub struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Output logs as JSON
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Where the API lives and where the session is kept.
#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// API base URL
    #[arg(
        long,
        env = "TESSERA_API_URL",
        default_value = "http://localhost:8000",
        global = true
    )]
    pub api_url: String,

    /// Directory holding the stored session (defaults to the platform data dir)
    #[arg(long, env = "TESSERA_DATA_DIR", global = true)]
    pub data_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Sign in and store the session
    Login(login::LoginArgs),

    /// Sign out and forget the session
    Logout(logout::LogoutArgs),

    /// Show the signed-in user
    Whoami(whoami::WhoamiArgs),

    /// Show the stored session without contacting the server
    Status(status::StatusArgs),

    /// Renew the access token now
    Refresh(refresh::RefreshArgs),

    /// Send an authenticated request
    Request(request::RequestArgs),
}
