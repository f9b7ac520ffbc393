//! Token lifecycle: caching, single-flight refresh and proactive renewal.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use tessera_core::error::{StoreError, TransportError};
use tessera_core::{
    AccessToken, CachedToken, ClientConfig, CredentialSet, CredentialStore, HttpRequest,
    HttpTransport, ListenerRegistry, Method, Subscription, TokenGrant,
};

use crate::endpoints::TokenResponse;
use crate::lock;

type PendingRefresh = Shared<BoxFuture<'static, bool>>;

/// Why a refresh attempt failed. Only ever logged.
#[derive(Debug, Error)]
enum RefreshFailure {
    #[error("no stored credentials")]
    NoCredentials,
    #[error("no refresh token available")]
    NoRefreshToken,
    #[error("refresh request failed: {0}")]
    Transport(#[from] TransportError),
    #[error("refresh rejected with HTTP {status}")]
    Rejected { status: u16 },
    #[error("malformed refresh response: {0}")]
    Malformed(String),
    #[error("could not persist refreshed credentials: {0}")]
    Persistence(#[from] StoreError),
}

/// Owner of the current credential set.
///
/// `TokenManager` is the single source of truth for "what is the current
/// valid access token, and is it time to renew it". It is cheap to clone
/// (internal `Arc`); every clone shares the same cache, pending refresh and
/// timer.
///
/// Two mechanisms keep the token fresh:
///
/// - a proactive timer armed for `expires_at - lead` on every successful
///   [`set_credentials`](Self::set_credentials), where `lead` is
///   `proactive_threshold` capped at half the remaining lifetime, so short
///   lived tokens are renewed at their midpoint instead of immediately;
/// - a reactive check in [`get_valid_token`](Self::get_valid_token) that
///   refreshes when less than `reactive_threshold` remains, which covers a
///   delayed timer or a suspended process.
///
/// Both go through [`refresh_token`](Self::refresh_token), which runs at most
/// one refresh request at a time no matter how many callers ask.
#[derive(Clone)]
pub struct TokenManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    config: ClientConfig,
    store: Arc<dyn CredentialStore>,
    transport: Arc<dyn HttpTransport>,
    cache: Mutex<Option<CachedToken>>,
    pending: Mutex<Option<PendingRefresh>>,
    timer: Mutex<Option<JoinHandle<()>>>,
    /// Bumped whenever the timer is re-armed or cancelled.
    timer_generation: AtomicU64,
    listeners: ListenerRegistry<bool>,
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        let timer = self
            .timer
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(timer) = timer {
            timer.abort();
        }
    }
}

impl TokenManager {
    pub fn new(
        config: ClientConfig,
        store: Arc<dyn CredentialStore>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                config,
                store,
                transport,
                cache: Mutex::new(None),
                pending: Mutex::new(None),
                timer: Mutex::new(None),
                timer_generation: AtomicU64::new(0),
                listeners: ListenerRegistry::new(),
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    fn storage_key(&self) -> &str {
        &self.inner.config.storage_key
    }

    /// Restore persisted credentials: prime the cache and arm the timer.
    ///
    /// Returns whether credentials were found.
    #[instrument(skip(self))]
    pub async fn init(&self) -> bool {
        match self.load().await {
            Some(set) => {
                debug!(expires_at = %set.expires_at, "restored stored credentials");
                *lock(&self.inner.cache) = Some(set.cache_entry());
                self.schedule_refresh(set.expires_at);
                true
            }
            None => false,
        }
    }

    /// Cancel the proactive timer. Credentials stay persisted.
    pub fn dispose(&self) {
        self.cancel_timer();
    }

    /// Persist a new credential set and make it current.
    ///
    /// The absolute expiry is derived from `expires_in` when the grant does
    /// not carry one. The cache is only updated once the store accepted the
    /// write.
    ///
    /// # Errors
    ///
    /// Returns the store's error if the credentials could not be persisted.
    #[instrument(skip(self, grant), fields(expires_in = grant.expires_in))]
    pub async fn set_credentials(&self, grant: TokenGrant) -> Result<CredentialSet, StoreError> {
        let set = grant.into_credential_set(Utc::now());
        let value = serde_json::to_value(&set)
            .map_err(|e| StoreError::serialization(self.storage_key(), e))?;

        self.inner.store.set(self.storage_key(), value).await?;

        *lock(&self.inner.cache) = Some(set.cache_entry());
        self.schedule_refresh(set.expires_at);

        debug!(expires_at = %set.expires_at, "credentials stored");
        Ok(set)
    }

    /// Return a usable access token, refreshing first if it is about to expire.
    ///
    /// `None` means there is no session, or the refresh failed.
    pub async fn get_valid_token(&self) -> Option<AccessToken> {
        self.valid_entry().await.map(|entry| entry.token)
    }

    /// `Authorization` header value for the current valid token.
    pub async fn authorization(&self) -> Option<String> {
        self.valid_entry()
            .await
            .map(|entry| format!("{} {}", entry.token_type, entry.token.as_str()))
    }

    /// `Authorization` header value from the in-memory cache, without I/O
    /// and without refreshing.
    pub fn cached_authorization(&self) -> Option<String> {
        lock(&self.inner.cache)
            .as_ref()
            .map(|entry| format!("{} {}", entry.token_type, entry.token.as_str()))
    }

    async fn valid_entry(&self) -> Option<CachedToken> {
        let reactive = self.inner.config.reactive_threshold();

        let cached = lock(&self.inner.cache).clone();
        if let Some(entry) = cached.filter(|c| c.is_fresh(Utc::now(), reactive)) {
            return Some(entry);
        }

        let set = self.load().await?;
        if set.expires_within(Utc::now(), reactive) {
            debug!(expires_at = %set.expires_at, "access token near expiry");
            if !self.refresh_token().await {
                return None;
            }
            return lock(&self.inner.cache).clone();
        }

        let entry = set.cache_entry();
        *lock(&self.inner.cache) = Some(entry.clone());
        Some(entry)
    }

    /// Read the persisted credential set, if any.
    pub async fn credentials(&self) -> Option<CredentialSet> {
        self.load().await
    }

    async fn load(&self) -> Option<CredentialSet> {
        match self.inner.store.get(self.storage_key()).await {
            Ok(Some(value)) => match serde_json::from_value(value) {
                Ok(set) => Some(set),
                Err(e) => {
                    warn!(error = %e, "stored credentials are unreadable");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "failed to read stored credentials");
                None
            }
        }
    }

    /// Renew the access token using the refresh token.
    ///
    /// Concurrent callers share one refresh: the first call starts it, later
    /// calls wait for the same outcome. Returns `true` on success. On failure
    /// every stored credential is cleared. Listeners registered with
    /// [`on_token_refresh`](Self::on_token_refresh) are notified once per
    /// refresh, not once per caller.
    pub async fn refresh_token(&self) -> bool {
        match self.join_or_start_refresh(None) {
            Some(pending) => pending.await,
            None => false,
        }
    }

    /// Returns the in-flight refresh, starting one if needed.
    ///
    /// A timer passes its generation: if no refresh is in flight and the
    /// timer has since been re-armed or cancelled, the tick is stale and
    /// nothing starts.
    fn join_or_start_refresh(&self, timer_generation: Option<u64>) -> Option<PendingRefresh> {
        let mut slot = lock(&self.inner.pending);
        if let Some(pending) = slot.as_ref() {
            debug!("joining in-flight refresh");
            return Some(pending.clone());
        }

        let current_generation = self.inner.timer_generation.load(Ordering::SeqCst);
        if timer_generation.is_some_and(|generation| generation != current_generation) {
            debug!("stale refresh timer tick ignored");
            return None;
        }

        let manager = self.clone();
        let task = tokio::spawn(async move {
            let ok = manager.perform_refresh().await;
            lock(&manager.inner.pending).take();
            manager.inner.listeners.notify(&ok);
            ok
        });

        let weak = Arc::downgrade(&self.inner);
        let pending = async move {
            match task.await {
                Ok(ok) => ok,
                Err(e) => {
                    warn!(error = %e, "refresh task did not complete");
                    if let Some(inner) = weak.upgrade() {
                        lock(&inner.pending).take();
                    }
                    false
                }
            }
        }
        .boxed()
        .shared();

        *slot = Some(pending.clone());
        Some(pending)
    }

    #[instrument(skip(self))]
    async fn perform_refresh(&self) -> bool {
        info!("Refreshing access token");
        match self.exchange_refresh_token().await {
            Ok(set) => {
                debug!(expires_at = %set.expires_at, "access token refreshed");
                true
            }
            Err(reason) => {
                warn!(%reason, "token refresh failed, clearing credentials");
                self.clear_tokens().await;
                false
            }
        }
    }

    async fn exchange_refresh_token(&self) -> Result<CredentialSet, RefreshFailure> {
        let current = self.load().await.ok_or(RefreshFailure::NoCredentials)?;
        let refresh_token = current
            .refresh_token
            .ok_or(RefreshFailure::NoRefreshToken)?;

        let config = &self.inner.config;
        let url = config.base_url.endpoint(&config.endpoints.refresh);
        let mut request = HttpRequest::new(Method::Post, url);
        request.set_header("Authorization", format!("Bearer {}", refresh_token.as_str()));
        request.timeout = Some(config.request_timeout());

        let response = self.inner.transport.send(request).await?;
        if !response.is_success() {
            return Err(RefreshFailure::Rejected {
                status: response.status,
            });
        }

        let body: TokenResponse = response
            .json()
            .map_err(|e| RefreshFailure::Malformed(e.to_string()))?;
        let grant = body
            .into_grant(Some(refresh_token))
            .ok_or_else(|| RefreshFailure::Malformed("missing access_token".to_string()))?;

        Ok(self.set_credentials(grant).await?)
    }

    /// Forget the session: store, cache and timer.
    ///
    /// Store errors are logged, not returned.
    #[instrument(skip(self))]
    pub async fn clear_tokens(&self) {
        self.cancel_timer();
        *lock(&self.inner.cache) = None;
        if let Err(e) = self.inner.store.remove(self.storage_key()).await {
            warn!(error = %e, "failed to remove stored credentials");
        }
        debug!("credentials cleared");
    }

    /// Non-blocking best-effort check against the store's synchronous path.
    ///
    /// Suitable for gating UI only; the answer may be stale, and a `true`
    /// does not mean the server will accept the token.
    pub fn has_valid_token(&self) -> bool {
        self.inner
            .store
            .get_sync(self.storage_key())
            .and_then(|value| serde_json::from_value::<CredentialSet>(value).ok())
            .is_some_and(|set| !set.is_expired(Utc::now()))
    }

    /// Register a callback for refresh outcomes (`true` on success).
    pub fn on_token_refresh(&self, listener: impl Fn(bool) + Send + Sync + 'static) -> Subscription {
        self.inner.listeners.add(move |ok: &bool| listener(*ok))
    }

    /// Whether a proactive refresh is currently armed.
    pub fn is_refresh_scheduled(&self) -> bool {
        lock(&self.inner.timer)
            .as_ref()
            .is_some_and(|timer| !timer.is_finished())
    }

    fn schedule_refresh(&self, expires_at: DateTime<Utc>) {
        let remaining = (expires_at - Utc::now()).to_std().unwrap_or_default();
        let delay = remaining.saturating_sub(refresh_lead(
            remaining,
            self.inner.config.proactive_threshold(),
        ));
        let generation = self.inner.timer_generation.fetch_add(1, Ordering::SeqCst) + 1;

        let weak: Weak<ManagerInner> = Arc::downgrade(&self.inner);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            debug!("proactive refresh timer fired");
            let manager = TokenManager { inner };
            if let Some(pending) = manager.join_or_start_refresh(Some(generation)) {
                pending.await;
            }
        });

        debug!(delay_secs = delay.as_secs(), "proactive refresh scheduled");
        if let Some(previous) = lock(&self.inner.timer).replace(timer) {
            previous.abort();
        }
    }

    fn cancel_timer(&self) {
        self.inner.timer_generation.fetch_add(1, Ordering::SeqCst);
        if let Some(timer) = lock(&self.inner.timer).take() {
            timer.abort();
        }
    }
}

/// How long before expiry the proactive timer fires.
fn refresh_lead(remaining: Duration, threshold: Duration) -> Duration {
    threshold.min(remaining / 2)
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("base_url", &self.inner.config.base_url)
            .field("storage_key", &self.inner.config.storage_key)
            .field("tokens", &"[REDACTED]")
            .finish()
    }
}
