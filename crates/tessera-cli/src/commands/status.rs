//! Status command implementation.

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Args;
use serde::Serialize;

use tessera_http::AuthService;

use crate::output;

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Print the status as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct SessionStatus {
    api_url: String,
    authenticated: bool,
    token_type: Option<String>,
    expires_at: Option<DateTime<Utc>>,
    expires_in_secs: Option<u64>,
    refreshable: bool,
}

pub async fn run(args: StatusArgs, session: &AuthService) -> Result<()> {
    let tokens = session.tokens();
    let now = Utc::now();
    let stored = tokens.credentials().await;

    let status = SessionStatus {
        api_url: tokens.config().base_url.to_string(),
        authenticated: session.is_authenticated(),
        token_type: stored.as_ref().map(|set| set.token_type.clone()),
        expires_at: stored.as_ref().map(|set| set.expires_at),
        expires_in_secs: stored.as_ref().map(|set| set.remaining(now).as_secs()),
        refreshable: stored
            .as_ref()
            .is_some_and(|set| set.refresh_token.is_some()),
    };

    if args.json {
        return output::json(&status);
    }

    output::field("API", &status.api_url);
    if stored.is_none() {
        output::field("Session", "none");
        return Ok(());
    }

    let state = if status.authenticated {
        "active"
    } else {
        "expired"
    };
    output::field("Session", state);
    if let Some(expires_at) = status.expires_at {
        output::field("Expires", &expires_at.to_rfc3339());
    }
    if let Some(secs) = status.expires_in_secs {
        output::field("Remaining", &format!("{}m {}s", secs / 60, secs % 60));
    }
    output::field("Refreshable", if status.refreshable { "yes" } else { "no" });

    Ok(())
}
