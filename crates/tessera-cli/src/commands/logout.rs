//! Logout command implementation.

use anyhow::Result;
use clap::Args;

use tessera_http::AuthService;

use crate::output;

#[derive(Args, Debug)]
pub struct LogoutArgs {}

pub async fn run(_args: LogoutArgs, session: &AuthService) -> Result<()> {
    session.logout().await;
    output::success("Logged out");
    Ok(())
}
