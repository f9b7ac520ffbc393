//! Authenticated request client with one-shot 401 recovery.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, instrument, warn};

use tessera_core::{
    ApiError, AuthFailureReason, AuthNotifier, AuthSignal, HttpError, HttpRequest, HttpResponse,
    HttpTransport, Method, Subscription,
};

use crate::lock;
use crate::manager::TokenManager;

const AUTHORIZATION: &str = "Authorization";

/// Per-request knobs.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    /// Overrides the configured request timeout.
    pub timeout: Option<Duration>,
    /// Send without a bearer token (public endpoints such as login).
    pub skip_auth: bool,
    /// Refresh and retry once when the server answers 401.
    pub retry_on_unauthorized: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            headers: Vec::new(),
            query: Vec::new(),
            timeout: None,
            skip_auth: false,
            retry_on_unauthorized: true,
        }
    }
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn skip_auth(mut self) -> Self {
        self.skip_auth = true;
        self.retry_on_unauthorized = false;
        self
    }

    pub fn without_retry(mut self) -> Self {
        self.retry_on_unauthorized = false;
        self
    }
}

/// A decoded successful response.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse<T> {
    pub data: T,
    pub status: u16,
}

#[derive(Default)]
struct RetryState {
    refreshing: bool,
    waiters: Vec<oneshot::Sender<bool>>,
}

enum Recovery {
    /// The token rotated since the request was sent.
    Retry,
    /// The session is gone.
    Fail,
    Wait(oneshot::Receiver<bool>),
    Lead,
}

/// Releases requests queued behind a refresh, even if the leading request
/// is cancelled mid-refresh.
struct LeaderGuard<'a> {
    state: &'a Mutex<RetryState>,
    outcome: bool,
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        let waiters = {
            let mut state = lock(self.state);
            state.refreshing = false;
            std::mem::take(&mut state.waiters)
        };
        debug!(waiters = waiters.len(), outcome = self.outcome, "releasing queued requests");
        for waiter in waiters {
            let _ = waiter.send(self.outcome);
        }
    }
}

/// HTTP client that attaches the current bearer token to every request.
///
/// When the server answers 401 the client asks the [`TokenManager`] for a
/// refresh and retries the request exactly once. Requests that hit a 401
/// while that refresh is running wait for it instead of starting their own.
/// If the refresh fails, every waiting request fails with
/// [`ApiError::Auth`] and [`AuthSignal::Failed`] is emitted once.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    tokens: TokenManager,
    transport: Arc<dyn HttpTransport>,
    notifier: AuthNotifier,
    retry: Mutex<RetryState>,
    failure_relay: Mutex<Option<Subscription>>,
}

impl ApiClient {
    pub fn new(
        tokens: TokenManager,
        transport: Arc<dyn HttpTransport>,
        notifier: AuthNotifier,
    ) -> Self {
        let relay_notifier = notifier.clone();
        let failure_relay = tokens.on_token_refresh(move |ok| {
            if !ok {
                relay_notifier.emit(AuthSignal::Failed(AuthFailureReason::TokenRefreshFailed));
            }
        });

        Self {
            inner: Arc::new(ClientInner {
                tokens,
                transport,
                notifier,
                retry: Mutex::new(RetryState::default()),
                failure_relay: Mutex::new(Some(failure_relay)),
            }),
        }
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.inner.tokens
    }

    pub fn notifier(&self) -> &AuthNotifier {
        &self.inner.notifier
    }

    /// Stop relaying refresh failures to the notifier.
    pub fn dispose(&self) {
        if let Some(relay) = lock(&self.inner.failure_relay).take() {
            relay.unsubscribe();
        }
    }

    pub async fn get<R: DeserializeOwned>(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<ApiResponse<R>, ApiError> {
        self.request(Method::Get, path, None, options).await
    }

    pub async fn post<R: DeserializeOwned>(
        &self,
        path: &str,
        body: &impl Serialize,
        options: RequestOptions,
    ) -> Result<ApiResponse<R>, ApiError> {
        self.request(Method::Post, path, encode_body(body)?, options)
            .await
    }

    pub async fn put<R: DeserializeOwned>(
        &self,
        path: &str,
        body: &impl Serialize,
        options: RequestOptions,
    ) -> Result<ApiResponse<R>, ApiError> {
        self.request(Method::Put, path, encode_body(body)?, options)
            .await
    }

    pub async fn patch<R: DeserializeOwned>(
        &self,
        path: &str,
        body: &impl Serialize,
        options: RequestOptions,
    ) -> Result<ApiResponse<R>, ApiError> {
        self.request(Method::Patch, path, encode_body(body)?, options)
            .await
    }

    pub async fn delete<R: DeserializeOwned>(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<ApiResponse<R>, ApiError> {
        self.request(Method::Delete, path, None, options).await
    }

    /// Send a request and decode the JSON response into `R`.
    ///
    /// An empty response body decodes as `null`, so `R = ()` or
    /// `Option<_>` work for endpoints that answer `204 No Content`.
    pub async fn request<R: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        options: RequestOptions,
    ) -> Result<ApiResponse<R>, ApiError> {
        let response = self.execute(method, path, body, &options).await?;
        let status = response.status;
        let decoded = if response.body.iter().all(u8::is_ascii_whitespace) {
            serde_json::from_value(Value::Null)
        } else {
            response.json()
        };
        let data = decoded.map_err(|e| ApiError::Decode {
            status,
            message: e.to_string(),
        })?;
        Ok(ApiResponse { data, status })
    }

    /// Send a request and return the body as untyped JSON.
    ///
    /// A body that is not JSON is returned as a string.
    pub async fn send_raw(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        options: RequestOptions,
    ) -> Result<ApiResponse<Value>, ApiError> {
        let response = self.execute(method, path, body, &options).await?;
        let data = response
            .json_value()
            .unwrap_or_else(|| Value::String(String::from_utf8_lossy(&response.body).into_owned()));
        Ok(ApiResponse {
            data,
            status: response.status,
        })
    }

    #[instrument(skip_all, fields(%method, path))]
    async fn execute(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        options: &RequestOptions,
    ) -> Result<HttpResponse, ApiError> {
        let config = self.inner.tokens.config();
        let mut request = HttpRequest::new(method, config.base_url.endpoint(path));
        request.query = options.query.clone();
        request.body = body;
        request.timeout = Some(options.timeout.unwrap_or_else(|| config.request_timeout()));
        for (name, value) in &options.headers {
            request.set_header(name, value.as_str());
        }

        let caller_authorization = request.header(AUTHORIZATION).is_some();
        if !options.skip_auth && !caller_authorization {
            if let Some(authorization) = self.inner.tokens.authorization().await {
                request.set_header(AUTHORIZATION, authorization);
            }
        }

        let response = self.dispatch(request.clone()).await?;
        if response.status != 401 {
            return into_result(response);
        }
        if options.skip_auth {
            return into_result(response);
        }
        if !options.retry_on_unauthorized || caller_authorization {
            return Err(ApiError::auth("Request was not authorized.", Some(401)));
        }

        debug!("received 401, attempting token refresh");
        let sent = request.header(AUTHORIZATION).map(str::to_owned);
        if !self.recover(sent.as_deref()).await {
            return Err(ApiError::auth(
                "Session expired. Please log in again.",
                Some(401),
            ));
        }

        let Some(authorization) = self.inner.tokens.authorization().await else {
            return Err(ApiError::auth(
                "Session expired. Please log in again.",
                Some(401),
            ));
        };
        request.set_header(AUTHORIZATION, authorization);

        let response = self.dispatch(request).await?;
        if response.status == 401 {
            warn!("request rejected again after token refresh");
            return Err(ApiError::auth(
                "Request was rejected after refreshing credentials.",
                Some(401),
            ));
        }
        into_result(response)
    }

    async fn dispatch(&self, request: HttpRequest) -> Result<HttpResponse, ApiError> {
        let response = self.inner.transport.send(request).await.map_err(|e| {
            debug!(error = %e, "request failed without a response");
            ApiError::Network(e)
        })?;
        debug!(status = response.status, "response received");
        Ok(response)
    }

    /// Wait for, or lead, the refresh that follows a 401.
    ///
    /// `sent` is the `Authorization` value the rejected request carried.
    async fn recover(&self, sent: Option<&str>) -> bool {
        let step = {
            let mut state = lock(&self.inner.retry);
            if state.refreshing {
                let (tx, rx) = oneshot::channel();
                state.waiters.push(tx);
                Recovery::Wait(rx)
            } else {
                match (sent, self.inner.tokens.cached_authorization()) {
                    (Some(sent), Some(current)) if sent != current => Recovery::Retry,
                    (Some(_), None) => Recovery::Fail,
                    _ => {
                        state.refreshing = true;
                        Recovery::Lead
                    }
                }
            }
        };

        match step {
            Recovery::Retry => {
                debug!("token already rotated, retrying");
                true
            }
            Recovery::Fail => false,
            Recovery::Wait(rx) => {
                debug!("waiting for in-flight refresh");
                rx.await.unwrap_or(false)
            }
            Recovery::Lead => {
                let mut guard = LeaderGuard {
                    state: &self.inner.retry,
                    outcome: false,
                };
                guard.outcome = self.inner.tokens.refresh_token().await;
                guard.outcome
            }
        }
    }
}

fn encode_body(body: &impl Serialize) -> Result<Option<Value>, ApiError> {
    let value = serde_json::to_value(body).map_err(|e| ApiError::InvalidRequest {
        message: format!("failed to encode request body: {e}"),
    })?;
    Ok((!value.is_null()).then_some(value))
}

fn into_result(response: HttpResponse) -> Result<HttpResponse, ApiError> {
    if response.is_success() {
        return Ok(response);
    }
    let body = response.json_value().filter(|v| !v.is_null());
    Err(ApiError::Http(HttpError::new(response.status, body)))
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("tokens", &self.inner.tokens)
            .finish()
    }
}
