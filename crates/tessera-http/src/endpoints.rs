//! Authentication endpoint request/response types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use tessera_core::tokens::DEFAULT_TOKEN_TYPE;
use tessera_core::{AccessToken, RefreshToken, TokenGrant};

/// Lifetime assumed when a token response carries no `expires_in`.
pub const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 3600;

/// Request body for the login endpoint.
#[derive(Serialize)]
pub struct LoginRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

/// Response from the login and refresh endpoints.
///
/// Every field is optional so a response missing the access token can be
/// reported as malformed instead of failing deserialization.
#[derive(Debug, Default, Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    /// Some deployments embed the profile in the login response.
    #[serde(default)]
    pub user: Option<Value>,
}

impl TokenResponse {
    /// Convert into a grant, or `None` when no access token was issued.
    ///
    /// `previous_refresh` is kept when the server does not rotate the
    /// refresh token.
    pub fn into_grant(self, previous_refresh: Option<RefreshToken>) -> Option<TokenGrant> {
        let access_token = self.access_token.filter(|t| !t.is_empty())?;
        let expires_in = self.expires_in.unwrap_or_else(|| {
            warn!(
                default_secs = DEFAULT_TOKEN_LIFETIME_SECS,
                "token response has no expires_in"
            );
            DEFAULT_TOKEN_LIFETIME_SECS
        });
        Some(TokenGrant {
            access_token: AccessToken::new(access_token),
            refresh_token: self
                .refresh_token
                .filter(|t| !t.is_empty())
                .map(RefreshToken::new)
                .or(previous_refresh),
            token_type: self
                .token_type
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| DEFAULT_TOKEN_TYPE.to_string()),
            expires_in,
            expires_at: self.expires_at,
        })
    }
}
