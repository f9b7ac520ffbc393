//! Login command implementation.

use anyhow::{Context, Result};
use clap::Args;

use tessera_core::LoginCredentials;
use tessera_http::AuthService;

use crate::output;

#[derive(Args, Debug)]
pub struct LoginArgs {
    /// Username or email to authenticate with
    #[arg(long, short)]
    pub username: String,

    /// Account password
    #[arg(long, env = "TESSERA_PASSWORD", hide_env_values = true)]
    pub password: String,
}

pub async fn run(args: LoginArgs, session: &AuthService) -> Result<()> {
    let credentials = LoginCredentials::new(args.username, args.password);

    output::note("Logging in...");

    let user = match session.login(&credentials).await {
        Ok(user) => user,
        Err(e) => {
            if e.retryable {
                output::warning("This looks temporary; try again in a moment.");
            }
            return Err(e).context("Failed to login");
        }
    };

    output::success("Logged in successfully");
    println!();
    output::field("User", &user.username);
    output::field("ID", &user.id);
    output::field("API", session.tokens().config().base_url.as_str());

    Ok(())
}
