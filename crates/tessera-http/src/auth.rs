//! Session facade: login, logout and the signed-in user.

use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use tessera_core::{
    ApiError, AuthError, AuthErrorKind, AuthNotifier, AuthSignal, ClientConfig, CredentialStore,
    Error, HttpTransport, ListenerRegistry, LoginCredentials, Method, Subscription, User,
};

use crate::client::{ApiClient, RequestOptions};
use crate::endpoints::{LoginRequest, TokenResponse};
use crate::lock;
use crate::manager::TokenManager;
use crate::transport::ReqwestTransport;

/// Login/logout and auth-state notifications on top of an [`ApiClient`].
///
/// A failed token refresh is reported here as a forced logout: auth-state
/// listeners are called with `None` and [`AuthSignal::StateChanged`]`(None)`
/// is emitted.
#[derive(Clone)]
pub struct AuthService {
    inner: Arc<AuthInner>,
}

struct AuthInner {
    api: ApiClient,
    listeners: ListenerRegistry<Option<User>>,
    refresh_relay: Mutex<Option<Subscription>>,
}

impl AuthService {
    pub fn new(api: ApiClient) -> Self {
        let listeners = ListenerRegistry::new();

        let relay_listeners = listeners.clone();
        let relay_notifier = api.notifier().clone();
        let refresh_relay = api.tokens().on_token_refresh(move |ok| {
            if !ok {
                info!("session ended after failed token refresh");
                relay_listeners.notify(&None);
                relay_notifier.emit(AuthSignal::StateChanged(None));
            }
        });

        Self {
            inner: Arc::new(AuthInner {
                api,
                listeners,
                refresh_relay: Mutex::new(Some(refresh_relay)),
            }),
        }
    }

    /// Wire a manager, client and facade over a `reqwest` transport.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for an inconsistent configuration and
    /// [`Error::Transport`] if the HTTP client cannot be built.
    pub fn connect(config: ClientConfig, store: Arc<dyn CredentialStore>) -> Result<Self, Error> {
        config.validate()?;
        let transport: Arc<dyn HttpTransport> = Arc::new(ReqwestTransport::new(&config)?);
        let tokens = TokenManager::new(config, store, Arc::clone(&transport));
        let api = ApiClient::new(tokens, transport, AuthNotifier::default());
        Ok(Self::new(api))
    }

    pub fn api(&self) -> &ApiClient {
        &self.inner.api
    }

    pub fn tokens(&self) -> &TokenManager {
        self.inner.api.tokens()
    }

    /// Restore a persisted session. Returns whether credentials were found.
    pub async fn init(&self) -> bool {
        self.tokens().init().await
    }

    /// Detach from the token manager and stop its timer.
    pub fn dispose(&self) {
        if let Some(relay) = lock(&self.inner.refresh_relay).take() {
            relay.unsubscribe();
        }
        self.inner.api.dispose();
        self.tokens().dispose();
    }

    /// Exchange a username and password for a session.
    ///
    /// # Errors
    ///
    /// Returns an [`AuthError`] classifying the failure. On error nothing is
    /// left persisted.
    #[instrument(skip(self, credentials), fields(username = credentials.username()))]
    pub async fn login(&self, credentials: &LoginCredentials) -> Result<User, AuthError> {
        info!("Logging in");
        let endpoints = &self.tokens().config().endpoints;

        let body = LoginRequest {
            username: credentials.username(),
            password: credentials.password(),
        };
        let response = self
            .inner
            .api
            .post::<TokenResponse>(&endpoints.login, &body, RequestOptions::new().skip_auth())
            .await
            .map_err(|e| {
                warn!(error = %e, "login request failed");
                AuthError::from_login_failure(&e)
            })?
            .data;

        let embedded_user = response.user.clone();
        let grant = response.into_grant(None).ok_or_else(|| {
            warn!("login response carried no access token");
            AuthError::malformed("The server did not return an access token.")
        })?;

        self.tokens().set_credentials(grant).await.map_err(|e| {
            warn!(error = %e, "could not store credentials");
            AuthError::new(
                AuthErrorKind::Unknown,
                format!("Could not save your session: {e}"),
            )
        })?;

        let user = match embedded_user.filter(Value::is_object) {
            Some(payload) => User::from_payload(&payload),
            None => self.fetch_profile().await,
        };
        let user = match user {
            Ok(user) => user,
            Err(e) => {
                warn!(error = %e, "profile unavailable after login, discarding session");
                self.tokens().clear_tokens().await;
                return Err(e);
            }
        };

        info!(user_id = %user.id, "Logged in");
        self.publish(Some(user.clone()));
        Ok(user)
    }

    async fn fetch_profile(&self) -> Result<User, AuthError> {
        let me = &self.tokens().config().endpoints.me;
        let payload = self
            .inner
            .api
            .get::<Value>(me, RequestOptions::new())
            .await
            .map_err(|e| match e {
                ApiError::Decode { .. } => AuthError::malformed(
                    "The server returned an unreadable user profile.",
                ),
                other => AuthError::from_login_failure(&other),
            })?
            .data;
        User::from_payload(&payload)
    }

    /// End the session.
    ///
    /// The server is told on a best-effort basis; local credentials are
    /// always cleared and listeners always see `None`.
    #[instrument(skip(self))]
    pub async fn logout(&self) {
        info!("Logging out");
        let authorization = match self.tokens().cached_authorization() {
            Some(authorization) => Some(authorization),
            None => self
                .tokens()
                .credentials()
                .await
                .map(|set| format!("{} {}", set.token_type, set.access_token.as_str())),
        };
        if let Some(authorization) = authorization {
            let logout = &self.tokens().config().endpoints.logout;
            let options = RequestOptions::new()
                .header("Authorization", authorization)
                .without_retry();
            let result = self
                .inner
                .api
                .send_raw(Method::Post, logout, None, options)
                .await;
            if let Err(e) = result {
                warn!(error = %e, "remote logout failed, clearing local session anyway");
            }
        } else {
            debug!("no stored token, skipping remote logout");
        }

        self.tokens().clear_tokens().await;
        self.publish(None);
    }

    /// The signed-in user, fetched from the server.
    ///
    /// Returns `None` when there is no valid session. A rejected token ends
    /// the session.
    #[instrument(skip(self))]
    pub async fn get_current_user(&self) -> Option<User> {
        self.tokens().get_valid_token().await?;

        let me = &self.tokens().config().endpoints.me;
        match self.inner.api.get::<Value>(me, RequestOptions::new()).await {
            Ok(response) => match User::from_payload(&response.data) {
                Ok(user) => Some(user),
                Err(e) => {
                    warn!(error = %e, "user profile is malformed");
                    None
                }
            },
            Err(e) if e.is_auth_error() => {
                // A failed refresh has already cleared and announced the
                // session end.
                if self.tokens().credentials().await.is_some() {
                    warn!(error = %e, "session rejected, logging out");
                    self.logout().await;
                } else {
                    debug!(error = %e, "session already ended by failed refresh");
                }
                None
            }
            Err(e) => {
                warn!(error = %e, "failed to fetch current user");
                None
            }
        }
    }

    /// Register a callback for sign-in and sign-out.
    pub fn on_auth_state_change(
        &self,
        listener: impl Fn(Option<&User>) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner
            .listeners
            .add(move |user: &Option<User>| listener(user.as_ref()))
    }

    /// Best-effort, non-blocking check. See [`TokenManager::has_valid_token`].
    pub fn is_authenticated(&self) -> bool {
        self.tokens().has_valid_token()
    }

    fn publish(&self, user: Option<User>) {
        self.inner.listeners.notify(&user);
        self.inner.api.notifier().emit(AuthSignal::StateChanged(user));
    }
}

impl std::fmt::Debug for AuthService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthService")
            .field("api", &self.inner.api)
            .field("listeners", &self.inner.listeners.len())
            .finish()
    }
}
