//! tessera-core - Core types and traits for bearer-token session handling.
//!
//! The engine itself lives in `tessera-http`; this crate holds what every
//! backend and caller shares: the credential data model, the collaborator
//! traits ([`CredentialStore`], [`HttpTransport`]), the error taxonomy, the
//! listener registry and the process-wide [`AuthNotifier`].

pub mod config;
pub mod credentials;
pub mod error;
pub mod events;
pub mod listeners;
pub mod tokens;
pub mod traits;
pub mod types;
pub mod user;

pub use config::{AuthEndpoints, ClientConfig};
pub use credentials::LoginCredentials;
pub use error::{
    ApiError, AuthError, AuthErrorKind, Error, HttpError, InvalidInputError, StoreError,
    TransportError,
};
pub use events::{AuthFailureReason, AuthNotifier, AuthSignal};
pub use listeners::{ListenerRegistry, Subscription};
pub use tokens::{AccessToken, CachedToken, CredentialSet, RefreshToken, TokenGrant};
pub use traits::{CredentialStore, HttpRequest, HttpResponse, HttpTransport, Method};
pub use types::ApiUrl;
pub use user::User;

/// Result type alias using the crate's Error type.
pub type Result<T> = std::result::Result<T, Error>;
