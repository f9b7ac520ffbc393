//! Refresh command implementation.

use anyhow::{Result, bail};
use clap::Args;

use tessera_http::AuthService;

use crate::output;

#[derive(Args, Debug)]
pub struct RefreshArgs {}

pub async fn run(_args: RefreshArgs, session: &AuthService) -> Result<()> {
    if session.tokens().credentials().await.is_none() {
        bail!("No active session. Run 'tessera login' first.");
    }

    output::note("Refreshing session...");

    if !session.tokens().refresh_token().await {
        bail!("Failed to refresh session; the stored session was cleared. Run 'tessera login' again.");
    }

    output::success("Session refreshed successfully");
    if let Some(set) = session.tokens().credentials().await {
        output::field("Expires", &set.expires_at.to_rfc3339());
    }

    Ok(())
}
