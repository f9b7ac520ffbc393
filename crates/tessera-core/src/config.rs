//! Client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, InvalidInputError};
use crate::types::ApiUrl;

/// Storage key under which the credential set is persisted.
pub const DEFAULT_STORAGE_KEY: &str = "auth_tokens";

/// Lead time before expiry at which the background refresh fires.
pub const DEFAULT_PROACTIVE_THRESHOLD: Duration = Duration::from_secs(10 * 60);

/// Remaining lifetime below which a token read triggers a refresh.
pub const DEFAULT_REACTIVE_THRESHOLD: Duration = Duration::from_secs(5 * 60);

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Paths of the authentication endpoints, relative to the base URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthEndpoints {
    pub login: String,
    pub refresh: String,
    pub me: String,
    pub logout: String,
}

impl Default for AuthEndpoints {
    fn default() -> Self {
        Self {
            login: "/auth/login".to_string(),
            refresh: "/auth/refresh".to_string(),
            me: "/auth/me".to_string(),
            logout: "/auth/logout".to_string(),
        }
    }
}

/// Configuration shared by the token manager, API client and auth service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub base_url: ApiUrl,
    #[serde(default)]
    pub endpoints: AuthEndpoints,
    #[serde(default = "default_proactive_secs")]
    pub proactive_refresh_secs: u64,
    #[serde(default = "default_reactive_secs")]
    pub reactive_refresh_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_storage_key")]
    pub storage_key: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_proactive_secs() -> u64 {
    DEFAULT_PROACTIVE_THRESHOLD.as_secs()
}

fn default_reactive_secs() -> u64 {
    DEFAULT_REACTIVE_THRESHOLD.as_secs()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT.as_secs()
}

fn default_storage_key() -> String {
    DEFAULT_STORAGE_KEY.to_string()
}

fn default_user_agent() -> String {
    concat!("tessera/", env!("CARGO_PKG_VERSION")).to_string()
}

impl ClientConfig {
    pub fn new(base_url: ApiUrl) -> Self {
        Self {
            base_url,
            endpoints: AuthEndpoints::default(),
            proactive_refresh_secs: default_proactive_secs(),
            reactive_refresh_secs: default_reactive_secs(),
            request_timeout_secs: default_timeout_secs(),
            storage_key: default_storage_key(),
            user_agent: default_user_agent(),
        }
    }

    /// Parse the base URL and build a default configuration.
    pub fn from_url(base_url: &str) -> Result<Self, Error> {
        Ok(Self::new(ApiUrl::new(base_url)?))
    }

    pub fn with_thresholds(mut self, proactive: Duration, reactive: Duration) -> Self {
        self.proactive_refresh_secs = proactive.as_secs();
        self.reactive_refresh_secs = reactive.as_secs();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_secs = timeout.as_secs();
        self
    }

    pub fn with_storage_key(mut self, key: impl Into<String>) -> Self {
        self.storage_key = key.into();
        self
    }

    pub fn with_endpoints(mut self, endpoints: AuthEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn proactive_threshold(&self) -> Duration {
        Duration::from_secs(self.proactive_refresh_secs)
    }

    pub fn reactive_threshold(&self) -> Duration {
        Duration::from_secs(self.reactive_refresh_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Check cross-field constraints.
    ///
    /// The proactive lead must not be shorter than the reactive one, or reads
    /// would refresh before the timer ever gets a chance to.
    pub fn validate(&self) -> Result<(), Error> {
        if self.proactive_refresh_secs < self.reactive_refresh_secs {
            return Err(InvalidInputError::Config {
                field: "proactive_refresh_secs".to_string(),
                reason: "must be at least reactive_refresh_secs".to_string(),
            }
            .into());
        }
        if self.request_timeout_secs == 0 {
            return Err(InvalidInputError::Config {
                field: "request_timeout_secs".to_string(),
                reason: "must be greater than zero".to_string(),
            }
            .into());
        }
        if self.storage_key.is_empty() {
            return Err(InvalidInputError::Config {
                field: "storage_key".to_string(),
                reason: "must not be empty".to_string(),
            }
            .into());
        }
        Ok(())
    }
}
