//! Error types for tessera.
//!
//! Each collaborator boundary gets its own error enum so callers can tell a
//! local persistence failure from an unreachable server or a rejected
//! credential. [`Error`] unifies them for code that does not care.

use std::fmt;

use serde_json::Value;
use thiserror::Error;

/// The unified error type for tessera operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The credential store could not be read or written.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// The server could not be reached.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// An authenticated request failed.
    #[error("api error: {0}")]
    Api(#[from] ApiError),

    /// Login, logout or session restoration failed.
    #[error("authentication error: {0}")]
    Auth(#[from] AuthError),

    /// Input validation errors (base URL, configuration values).
    #[error("invalid input: {0}")]
    InvalidInput(#[from] InvalidInputError),
}

/// Persistence errors raised by a [`CredentialStore`](crate::CredentialStore).
///
/// A store error says nothing about whether the credential itself is valid.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Reading or writing the backing medium failed.
    #[error("I/O error on '{key}': {message}")]
    Io { key: String, message: String },

    /// The value could not be encoded or decoded.
    #[error("serialization error on '{key}': {message}")]
    Serialization { key: String, message: String },

    /// The store refused the write (quota, read-only medium, injected fault).
    #[error("store unavailable: {message}")]
    Unavailable { message: String },
}

impl StoreError {
    pub fn io(key: impl Into<String>, err: impl fmt::Display) -> Self {
        StoreError::Io {
            key: key.into(),
            message: err.to_string(),
        }
    }

    pub fn serialization(key: impl Into<String>, err: impl fmt::Display) -> Self {
        StoreError::Serialization {
            key: key.into(),
            message: err.to_string(),
        }
    }
}

/// Transport-level errors: no HTTP response was received.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Network connection failed.
    #[error("connection failed: {message}")]
    Connection { message: String },

    /// DNS resolution failed.
    #[error("DNS resolution failed: {host}")]
    Dns { host: String },

    /// TLS/SSL error.
    #[error("TLS error: {message}")]
    Tls { message: String },

    /// Request timed out.
    #[error("request timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// The request could not be completed for another reason.
    #[error("HTTP error: {message}")]
    Http { message: String },
}

/// Error returned by the authenticated request client.
///
/// Every failure of the API client is one of these, so call sites can
/// branch on [`is_auth_error`](Self::is_auth_error)
/// and [`is_network_error`](Self::is_network_error) instead of matching on
/// strings.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// No response was received.
    #[error("network error: {0}")]
    Network(#[from] TransportError),

    /// The credential was rejected and could not be restored.
    #[error("{message}")]
    Auth { message: String, status: Option<u16> },

    /// The server answered with a non-2xx status other than a recoverable 401.
    #[error("{0}")]
    Http(HttpError),

    /// The server answered 2xx but the body did not match the expected shape.
    #[error("invalid response body (HTTP {status}): {message}")]
    Decode { status: u16, message: String },

    /// The request could not be built.
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },
}

impl ApiError {
    pub fn auth(message: impl Into<String>, status: Option<u16>) -> Self {
        ApiError::Auth {
            message: message.into(),
            status,
        }
    }

    /// HTTP status carried by the error, if a response was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Network(_) | ApiError::InvalidRequest { .. } => None,
            ApiError::Auth { status, .. } => *status,
            ApiError::Http(err) => Some(err.status),
            ApiError::Decode { status, .. } => Some(*status),
        }
    }

    /// Response body of an HTTP error, if the server sent one.
    pub fn body(&self) -> Option<&Value> {
        match self {
            ApiError::Http(err) => err.body.as_ref(),
            _ => None,
        }
    }

    pub fn message(&self) -> String {
        self.to_string()
    }

    pub fn is_network_error(&self) -> bool {
        matches!(self, ApiError::Network(_))
    }

    pub fn is_auth_error(&self) -> bool {
        matches!(self, ApiError::Auth { .. })
    }

    /// Server-side failure (5xx).
    pub fn is_server_error(&self) -> bool {
        self.status().is_some_and(|s| s >= 500)
    }
}

/// A non-2xx HTTP response.
#[derive(Debug, Clone)]
pub struct HttpError {
    /// HTTP status code.
    pub status: u16,
    /// Decoded JSON body, when the server sent one.
    pub body: Option<Value>,
    /// Server-supplied message (`message`, `detail` or `error` field).
    pub message: Option<String>,
}

impl HttpError {
    /// Build an HTTP error, extracting a message from common body shapes.
    pub fn new(status: u16, body: Option<Value>) -> Self {
        let message = body.as_ref().and_then(|b| {
            ["message", "detail", "error"]
                .iter()
                .find_map(|field| b.get(*field).and_then(Value::as_str))
                .map(str::to_string)
        });
        Self {
            status,
            body,
            message,
        }
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HTTP {}", self.status)?;
        if let Some(ref message) = self.message {
            write!(f, ": {}", message)?;
        }
        Ok(())
    }
}

impl std::error::Error for HttpError {}

/// Classification of a failed login or session operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorKind {
    /// The server rejected the username/password (HTTP 401).
    InvalidCredentials,
    /// The server failed (HTTP 5xx).
    Server,
    /// The server could not be reached.
    Network,
    /// The server answered 2xx without a usable token or user payload.
    MalformedResponse,
    /// Anything else.
    Unknown,
}

/// Facade-level authentication error with a user-facing message.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct AuthError {
    pub kind: AuthErrorKind,
    pub message: String,
    pub retryable: bool,
    pub status: Option<u16>,
}

impl AuthError {
    pub fn new(kind: AuthErrorKind, message: impl Into<String>) -> Self {
        let retryable = matches!(kind, AuthErrorKind::Server | AuthErrorKind::Network);
        Self {
            kind,
            message: message.into(),
            retryable,
            status: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(AuthErrorKind::MalformedResponse, message)
    }

    /// Classify a failed login request.
    pub fn from_login_failure(err: &ApiError) -> Self {
        match err {
            ApiError::Network(_) => Self::new(
                AuthErrorKind::Network,
                "Unable to reach the server. Check your connection and try again.",
            ),
            ApiError::Decode { status, .. } => Self::malformed(
                "The server returned an unexpected response. Please try again later.",
            )
            .with_status(*status),
            _ => match err.status() {
                Some(401) => Self::new(
                    AuthErrorKind::InvalidCredentials,
                    "Invalid username or password.",
                )
                .with_status(401),
                Some(status) if status >= 500 => Self::new(
                    AuthErrorKind::Server,
                    "The server encountered an error. Please try again later.",
                )
                .with_status(status),
                Some(status) => {
                    let mut auth_err = Self::new(AuthErrorKind::Unknown, format!("Login failed: {err}"))
                        .with_status(status);
                    auth_err.retryable = status == 429;
                    auth_err
                }
                None => Self::new(AuthErrorKind::Unknown, format!("Login failed: {err}")),
            },
        }
    }
}

/// Input validation errors.
#[derive(Debug, Error)]
pub enum InvalidInputError {
    /// Invalid API base URL.
    #[error("invalid API URL '{value}': {reason}")]
    ApiUrl { value: String, reason: String },

    /// Invalid configuration value.
    #[error("invalid configuration '{field}': {reason}")]
    Config { field: String, reason: String },

    /// Generic invalid input.
    #[error("invalid input: {message}")]
    Other { message: String },
}
