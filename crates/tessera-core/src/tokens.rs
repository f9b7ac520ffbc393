//! Token and credential-set types.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Default authorization scheme when the server does not name one.
pub const DEFAULT_TOKEN_TYPE: &str = "Bearer";

/// An access token for authenticated API requests.
///
/// # Security
///
/// - Never logged or displayed in Debug output
/// - Treat as opaque; do not parse or inspect
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    /// Create a new access token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the token value for use in authorization headers.
    ///
    /// # Security
    ///
    /// Use only when constructing HTTP authorization headers.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Hide token value in Debug output
impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AccessToken").field(&"[REDACTED]").finish()
    }
}

/// A refresh token for obtaining new access tokens.
///
/// # Security
///
/// - Never logged or displayed in Debug output
/// - Treat as opaque; do not parse or inspect
#[derive(Clone, PartialEq, Eq)]
pub struct RefreshToken(String);

impl RefreshToken {
    /// Create a new refresh token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the token value for use in refresh requests.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Hide token value in Debug output
impl fmt::Debug for RefreshToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RefreshToken").field(&"[REDACTED]").finish()
    }
}

macro_rules! string_serde {
    ($ty:ident) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.0)
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                String::deserialize(deserializer).map(Self)
            }
        }
    };
}

string_serde!(AccessToken);
string_serde!(RefreshToken);

fn default_token_type() -> String {
    DEFAULT_TOKEN_TYPE.to_string()
}

/// Credentials as handed to the token manager.
///
/// The absolute expiry is optional here; the lifetime is not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenGrant {
    pub access_token: AccessToken,
    #[serde(default)]
    pub refresh_token: Option<RefreshToken>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Lifetime in seconds.
    pub expires_in: u64,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl TokenGrant {
    pub fn new(access_token: impl Into<String>, expires_in: u64) -> Self {
        Self {
            access_token: AccessToken::new(access_token),
            refresh_token: None,
            token_type: default_token_type(),
            expires_in,
            expires_at: None,
        }
    }

    pub fn with_refresh_token(mut self, token: impl Into<String>) -> Self {
        self.refresh_token = Some(RefreshToken::new(token));
        self
    }

    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Resolve the absolute expiry against `now`.
    pub fn into_credential_set(self, now: DateTime<Utc>) -> CredentialSet {
        let expires_at = self
            .expires_at
            .unwrap_or_else(|| expiry_from_lifetime(now, self.expires_in));
        CredentialSet {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            token_type: self.token_type,
            expires_in: self.expires_in,
            expires_at,
        }
    }
}

/// `now + seconds`, saturating at the latest representable instant.
pub fn expiry_from_lifetime(now: DateTime<Utc>, seconds: u64) -> DateTime<Utc> {
    i64::try_from(seconds)
        .ok()
        .and_then(Duration::try_seconds)
        .and_then(|lifetime| now.checked_add_signed(lifetime))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// The persisted unit of authentication state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialSet {
    pub access_token: AccessToken,
    #[serde(default)]
    pub refresh_token: Option<RefreshToken>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    pub expires_in: u64,
    pub expires_at: DateTime<Utc>,
}

impl CredentialSet {
    /// True once `now` has reached the expiry instant.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// True when the token expires within `window` of `now`.
    pub fn expires_within(&self, now: DateTime<Utc>, window: std::time::Duration) -> bool {
        expires_within(self.expires_at, now, window)
    }

    /// Time left before expiry, zero if already expired.
    pub fn remaining(&self, now: DateTime<Utc>) -> std::time::Duration {
        (self.expires_at - now).to_std().unwrap_or_default()
    }

    pub fn cache_entry(&self) -> CachedToken {
        CachedToken {
            token: self.access_token.clone(),
            token_type: self.token_type.clone(),
            expires_at: self.expires_at,
        }
    }
}

/// In-memory fast-path copy of the access token and its expiry.
#[derive(Debug, Clone)]
pub struct CachedToken {
    pub token: AccessToken,
    pub token_type: String,
    pub expires_at: DateTime<Utc>,
}

impl CachedToken {
    /// True while the token outlives `window` from `now`.
    pub fn is_fresh(&self, now: DateTime<Utc>, window: std::time::Duration) -> bool {
        !expires_within(self.expires_at, now, window)
    }
}

fn expires_within(expires_at: DateTime<Utc>, now: DateTime<Utc>, window: std::time::Duration) -> bool {
    match Duration::from_std(window)
        .ok()
        .and_then(|window| now.checked_add_signed(window))
    {
        Some(deadline) => expires_at <= deadline,
        None => true,
    }
}
