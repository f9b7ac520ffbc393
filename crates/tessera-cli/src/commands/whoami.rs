//! Whoami command implementation.

use anyhow::{Context, Result};
use clap::Args;

use tessera_http::AuthService;

use crate::output;

#[derive(Args, Debug)]
pub struct WhoamiArgs {
    /// Print the user profile as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: WhoamiArgs, session: &AuthService) -> Result<()> {
    let user = session
        .get_current_user()
        .await
        .context("No active session. Run 'tessera login' first.")?;

    if args.json {
        return output::json_pretty(&user);
    }

    output::field("User", &user.username);
    output::field("ID", &user.id);
    if !user.full_name.is_empty() {
        output::field("Name", &user.full_name);
    }
    if !user.email.is_empty() {
        output::field("Email", &user.email);
    }
    output::field("Role", &user.role);
    output::field("Tier", &user.subscription_tier);
    if !user.permissions.is_empty() {
        output::field("Permissions", &user.permissions.join(", "));
    }

    Ok(())
}
