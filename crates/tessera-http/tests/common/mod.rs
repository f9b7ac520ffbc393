//! Shared fixtures for the tessera-http integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tessera_core::{ClientConfig, HttpRequest, HttpResponse, HttpTransport, TransportError};
use tessera_http::TokenManager;
use tessera_store::MemoryCredentialStore;

type Handler = dyn Fn(&HttpRequest) -> Result<HttpResponse, TransportError> + Send + Sync;
type Latency = dyn Fn(&HttpRequest) -> Duration + Send + Sync;

/// In-process transport answering from a closure and recording every request.
///
/// Latency is applied with `tokio::time::sleep`, so it follows paused test
/// time.
pub struct ScriptedTransport {
    handler: Box<Handler>,
    latency: Box<Latency>,
    calls: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub fn new(
        handler: impl Fn(&HttpRequest) -> Result<HttpResponse, TransportError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            handler: Box::new(handler),
            latency: Box::new(|_| Duration::ZERO),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn with_latency(
        latency: impl Fn(&HttpRequest) -> Duration + Send + Sync + 'static,
        handler: impl Fn(&HttpRequest) -> Result<HttpResponse, TransportError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            handler: Box::new(handler),
            latency: Box::new(latency),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<HttpRequest> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of requests whose URL ends with `path`.
    pub fn calls_to(&self, path: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|request| request.url.ends_with(path))
            .count()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.calls.lock().unwrap().push(request.clone());
        let latency = (self.latency)(&request);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        (self.handler)(&request)
    }
}

pub const BASE_URL: &str = "https://api.test";

pub fn config() -> ClientConfig {
    ClientConfig::from_url(BASE_URL).unwrap()
}

pub fn token_body(access: &str, refresh: Option<&str>, expires_in: u64) -> Value {
    let mut body = json!({
        "access_token": access,
        "token_type": "Bearer",
        "expires_in": expires_in,
    });
    if let Some(refresh) = refresh {
        body["refresh_token"] = json!(refresh);
    }
    body
}

pub fn ok_json(body: &Value) -> Result<HttpResponse, TransportError> {
    Ok(HttpResponse::json_body(200, body))
}

pub fn status(code: u16) -> Result<HttpResponse, TransportError> {
    Ok(HttpResponse::json_body(code, &json!({"detail": "scripted"})))
}

/// A manager over a fresh memory store and the given transport.
pub fn manager(transport: Arc<ScriptedTransport>) -> (TokenManager, MemoryCredentialStore) {
    let store = MemoryCredentialStore::new();
    let manager = TokenManager::new(config(), Arc::new(store.clone()), transport);
    (manager, store)
}

pub fn user_payload() -> Value {
    json!({
        "id": 42,
        "username": "ada",
        "email": "ada@example.com",
        "full_name": "Ada Lovelace",
        "role": "analyst",
        "permissions": ["reports:read"]
    })
}
