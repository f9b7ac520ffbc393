//! Token lifecycle tests against a scripted in-process transport.
//!
//! Timer behaviour is driven with paused tokio time.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::Utc;
use futures_util::future::join_all;
use tessera_core::{
    AuthFailureReason, AuthNotifier, AuthSignal, CredentialStore, StoreError, TokenGrant,
    TransportError,
};
use tessera_http::{ApiClient, TokenManager};

use common::{ScriptedTransport, config, manager, ok_json, status, token_body};

const REFRESH: &str = "/auth/refresh";

fn refreshes_to(access: &'static str) -> Arc<ScriptedTransport> {
    ScriptedTransport::new(move |request| {
        if request.url.ends_with(REFRESH) {
            ok_json(&token_body(access, Some("refresh-2"), 3600))
        } else {
            status(404)
        }
    })
}

fn initial_grant(expires_in: u64) -> TokenGrant {
    TokenGrant::new("access-1", expires_in).with_refresh_token("refresh-1")
}

#[tokio::test(start_paused = true)]
async fn fresh_token_is_served_from_cache() {
    let transport = refreshes_to("access-2");
    let (tokens, _store) = manager(transport.clone());

    tokens.set_credentials(initial_grant(3600)).await.unwrap();
    tokio::time::advance(Duration::from_secs(10)).await;

    let token = tokens.get_valid_token().await.unwrap();
    assert_eq!(token.as_str(), "access-1");
    assert!(transport.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn near_expiry_token_is_refreshed_before_use() {
    let transport = refreshes_to("access-2");
    let (tokens, _store) = manager(transport.clone());

    tokens.set_credentials(initial_grant(120)).await.unwrap();

    let token = tokens.get_valid_token().await.unwrap();
    assert_eq!(token.as_str(), "access-2");
    assert_eq!(transport.calls_to(REFRESH), 1);

    let refresh = &transport.calls()[0];
    assert_eq!(refresh.header("authorization"), Some("Bearer refresh-1"));

    let stored = tokens.credentials().await.unwrap();
    assert_eq!(stored.access_token.as_str(), "access-2");
    assert_eq!(stored.refresh_token.unwrap().as_str(), "refresh-2");
}

#[tokio::test]
async fn expiry_is_derived_from_lifetime() {
    let (tokens, _store) = manager(refreshes_to("unused"));

    let before = Utc::now();
    let set = tokens
        .set_credentials(TokenGrant::new("access-1", 3600))
        .await
        .unwrap();
    let after = Utc::now();

    assert!(set.expires_at >= before + chrono::Duration::seconds(3600));
    assert!(set.expires_at <= after + chrono::Duration::seconds(3600));
    assert_eq!(tokens.credentials().await.unwrap().expires_at, set.expires_at);
    tokens.dispose();
}

#[tokio::test]
async fn explicit_expiry_is_kept() {
    let (tokens, _store) = manager(refreshes_to("unused"));
    let expires_at = Utc::now() + chrono::Duration::hours(2);

    let set = tokens
        .set_credentials(TokenGrant::new("access-1", 60).with_expires_at(expires_at))
        .await
        .unwrap();

    assert_eq!(set.expires_at, expires_at);
    assert_eq!(set.expires_in, 60);
    tokens.dispose();
}

#[tokio::test(start_paused = true)]
async fn concurrent_refreshes_share_one_request() {
    let transport = ScriptedTransport::with_latency(
        |_| Duration::from_millis(50),
        |request| {
            if request.url.ends_with(REFRESH) {
                ok_json(&token_body("access-2", None, 3600))
            } else {
                status(404)
            }
        },
    );
    let (tokens, _store) = manager(transport.clone());
    tokens.set_credentials(initial_grant(3600)).await.unwrap();

    let notified = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&notified);
    let _subscription = tokens.on_token_refresh(move |ok| {
        assert!(ok);
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let outcomes = join_all((0..8).map(|_| tokens.refresh_token())).await;

    assert!(outcomes.iter().all(|ok| *ok));
    assert_eq!(transport.calls_to(REFRESH), 1);
    assert_eq!(notified.load(Ordering::SeqCst), 1);
    assert_eq!(tokens.get_valid_token().await.unwrap().as_str(), "access-2");
    // Non-rotating server: the original refresh token is kept.
    let stored = tokens.credentials().await.unwrap();
    assert_eq!(stored.refresh_token.unwrap().as_str(), "refresh-1");
}

#[tokio::test(start_paused = true)]
async fn rejected_refresh_fails_everyone_and_signals_once() {
    let transport = ScriptedTransport::with_latency(
        |_| Duration::from_millis(50),
        |_| status(401),
    );
    let (tokens, store) = manager(transport.clone());
    tokens.set_credentials(initial_grant(3600)).await.unwrap();

    let notifier = AuthNotifier::default();
    let mut signals = notifier.subscribe();
    let _api = ApiClient::new(tokens.clone(), transport.clone(), notifier);

    let outcomes = join_all((0..4).map(|_| tokens.refresh_token())).await;

    assert!(outcomes.iter().all(|ok| !ok));
    assert_eq!(transport.calls_to(REFRESH), 1);
    assert!(!tokens.has_valid_token());
    assert!(!store.contains("auth_tokens"));
    assert!(tokens.cached_authorization().is_none());
    assert!(!tokens.is_refresh_scheduled());

    let mut failures = 0;
    while let Ok(signal) = signals.try_recv() {
        if signal == AuthSignal::Failed(AuthFailureReason::TokenRefreshFailed) {
            failures += 1;
        }
    }
    assert_eq!(failures, 1);
}

#[tokio::test]
async fn network_failure_during_refresh_clears_state() {
    let transport = ScriptedTransport::new(|_| {
        Err(TransportError::Connection {
            message: "connection refused".into(),
        })
    });
    let (tokens, store) = manager(transport.clone());
    tokens.set_credentials(initial_grant(3600)).await.unwrap();

    assert!(!tokens.refresh_token().await);
    assert!(!tokens.has_valid_token());
    assert!(!store.contains("auth_tokens"));
    assert!(tokens.get_valid_token().await.is_none());
}

#[tokio::test]
async fn malformed_refresh_response_clears_state() {
    let transport = ScriptedTransport::new(|_| ok_json(&serde_json::json!({"token_type": "Bearer"})));
    let (tokens, store) = manager(transport);
    tokens.set_credentials(initial_grant(3600)).await.unwrap();

    assert!(!tokens.refresh_token().await);
    assert!(!store.contains("auth_tokens"));
}

#[tokio::test]
async fn refresh_without_refresh_token_fails_without_network() {
    let transport = refreshes_to("access-2");
    let (tokens, store) = manager(transport.clone());
    tokens
        .set_credentials(TokenGrant::new("access-1", 3600))
        .await
        .unwrap();

    assert!(!tokens.refresh_token().await);
    assert!(transport.calls().is_empty());
    assert!(!store.contains("auth_tokens"));
}

#[tokio::test]
async fn refresh_with_nothing_stored_fails() {
    let transport = refreshes_to("access-2");
    let (tokens, _store) = manager(transport.clone());

    assert!(!tokens.refresh_token().await);
    assert!(transport.calls().is_empty());
}

#[tokio::test]
async fn failed_write_leaves_cache_untouched() {
    let (tokens, store) = manager(refreshes_to("unused"));
    tokens.set_credentials(initial_grant(3600)).await.unwrap();

    store.set_fail_writes(true);
    let err = tokens
        .set_credentials(TokenGrant::new("access-other", 3600))
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::Unavailable { .. }));
    assert_eq!(tokens.get_valid_token().await.unwrap().as_str(), "access-1");
    assert_eq!(
        tokens.cached_authorization().as_deref(),
        Some("Bearer access-1")
    );
    tokens.dispose();
}

#[tokio::test]
async fn failed_write_after_refresh_counts_as_failure() {
    let transport = refreshes_to("access-2");
    let (tokens, store) = manager(transport.clone());
    tokens.set_credentials(initial_grant(3600)).await.unwrap();

    store.set_fail_writes(true);
    assert!(!tokens.refresh_token().await);
    assert_eq!(transport.calls_to(REFRESH), 1);
    assert!(!store.contains("auth_tokens"));
    assert!(tokens.cached_authorization().is_none());
}

#[tokio::test(start_paused = true)]
async fn proactive_and_reactive_refresh_converge() {
    // Proactive: the timer fires ten minutes before expiry.
    let proactive_transport = refreshes_to("access-2");
    let (proactive, _store) = manager(proactive_transport.clone());
    proactive.set_credentials(initial_grant(3600)).await.unwrap();
    assert!(proactive.is_refresh_scheduled());

    tokio::time::sleep(Duration::from_secs(2990)).await;
    assert_eq!(proactive_transport.calls_to(REFRESH), 0);

    tokio::time::sleep(Duration::from_secs(15)).await;
    assert_eq!(proactive_transport.calls_to(REFRESH), 1);

    // Reactive: no timer, the token is simply used close to expiry.
    let reactive_transport = refreshes_to("access-2");
    let (reactive, _store) = manager(reactive_transport.clone());
    reactive.set_credentials(initial_grant(200)).await.unwrap();
    reactive.dispose();

    let token = reactive.get_valid_token().await.unwrap();
    assert_eq!(reactive_transport.calls_to(REFRESH), 1);

    assert_eq!(token.as_str(), "access-2");
    assert_eq!(
        proactive.get_valid_token().await.unwrap().as_str(),
        token.as_str()
    );
    assert_eq!(
        proactive.cached_authorization(),
        reactive.cached_authorization()
    );
    assert_eq!(proactive_transport.calls_to(REFRESH), 1);
}

#[tokio::test(start_paused = true)]
async fn short_lived_tokens_renew_at_their_midpoint() {
    let transport = ScriptedTransport::with_latency(
        |_| Duration::from_millis(10),
        |request| {
            if request.url.ends_with(REFRESH) {
                ok_json(&token_body("access-2", Some("refresh-2"), 300))
            } else {
                status(404)
            }
        },
    );
    let (tokens, _store) = manager(transport.clone());
    tokens.set_credentials(initial_grant(300)).await.unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(transport.calls_to(REFRESH), 0);

    tokio::time::sleep(Duration::from_secs(159)).await;
    assert_eq!(transport.calls_to(REFRESH), 1);

    // One renewal every 150 s thereafter.
    tokio::time::sleep(Duration::from_secs(840)).await;
    assert_eq!(transport.calls_to(REFRESH), 6);
    assert!(tokens.is_refresh_scheduled());
    tokens.dispose();
}

#[tokio::test(start_paused = true)]
async fn new_credentials_rearm_the_timer() {
    let transport = refreshes_to("access-2");
    let (tokens, _store) = manager(transport.clone());

    tokens.set_credentials(initial_grant(3600)).await.unwrap();
    tokens.set_credentials(initial_grant(7200)).await.unwrap();

    tokio::time::sleep(Duration::from_secs(3100)).await;
    assert_eq!(transport.calls_to(REFRESH), 0);

    tokio::time::sleep(Duration::from_secs(3600)).await;
    assert_eq!(transport.calls_to(REFRESH), 1);
    tokens.dispose();
}

#[tokio::test(start_paused = true)]
async fn clearing_cancels_the_timer() {
    let transport = refreshes_to("access-2");
    let (tokens, store) = manager(transport.clone());

    tokens.set_credentials(initial_grant(3600)).await.unwrap();
    tokens.clear_tokens().await;

    assert!(!tokens.is_refresh_scheduled());
    assert!(!store.contains("auth_tokens"));
    assert!(tokens.get_valid_token().await.is_none());

    tokio::time::sleep(Duration::from_secs(4000)).await;
    assert!(transport.calls().is_empty());

    // Clearing twice is harmless.
    tokens.clear_tokens().await;
}

#[tokio::test(start_paused = true)]
async fn dropping_the_last_handle_stops_the_timer() {
    let transport = refreshes_to("access-2");
    let (tokens, _store) = manager(transport.clone());
    tokens.set_credentials(initial_grant(3600)).await.unwrap();
    drop(tokens);

    tokio::time::sleep(Duration::from_secs(4000)).await;
    assert!(transport.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn init_restores_persisted_credentials() {
    let transport = refreshes_to("access-2");
    let (first, store) = manager(transport.clone());
    first.set_credentials(initial_grant(3600)).await.unwrap();
    first.dispose();

    let restored = TokenManager::new(config(), Arc::new(store.clone()), transport.clone());
    assert!(restored.cached_authorization().is_none());
    assert!(restored.init().await);
    assert_eq!(
        restored.cached_authorization().as_deref(),
        Some("Bearer access-1")
    );
    assert!(restored.is_refresh_scheduled());

    restored.dispose();
    restored.dispose();
    assert!(!restored.is_refresh_scheduled());

    let (empty, _store) = manager(transport);
    assert!(!empty.init().await);
    assert!(!empty.is_refresh_scheduled());
}

#[tokio::test]
async fn unreadable_stored_value_is_treated_as_absent() {
    let (tokens, store) = manager(refreshes_to("unused"));
    store
        .set("auth_tokens", serde_json::json!({"unexpected": true}))
        .await
        .unwrap();

    assert!(tokens.get_valid_token().await.is_none());
    assert!(!tokens.has_valid_token());
    assert!(!tokens.init().await);
}

#[tokio::test]
async fn sync_check_reflects_expiry() {
    let (tokens, _store) = manager(ScriptedTransport::new(|_| status(500)));
    assert!(!tokens.has_valid_token());

    tokens.set_credentials(initial_grant(3600)).await.unwrap();
    assert!(tokens.has_valid_token());

    let past = Utc::now() - chrono::Duration::minutes(1);
    tokens
        .set_credentials(initial_grant(3600).with_expires_at(past))
        .await
        .unwrap();
    assert!(!tokens.has_valid_token());
    tokens.dispose();
}

#[tokio::test]
async fn authorization_uses_the_token_type() {
    let (tokens, _store) = manager(refreshes_to("unused"));
    let mut grant = TokenGrant::new("abc", 3600);
    grant.token_type = "DPoP".into();
    tokens.set_credentials(grant).await.unwrap();

    assert_eq!(tokens.authorization().await.as_deref(), Some("DPoP abc"));
    tokens.dispose();
}

#[tokio::test]
async fn refresh_listeners_can_unsubscribe_and_survive_panics() {
    let transport = refreshes_to("access-2");
    let (tokens, _store) = manager(transport);
    tokens.set_credentials(initial_grant(3600)).await.unwrap();

    let _panicky = tokens.on_token_refresh(|_| panic!("listener bug"));
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);
    let subscription = tokens.on_token_refresh(move |ok| {
        assert!(ok);
        counter.fetch_add(1, Ordering::SeqCst);
    });

    assert!(tokens.refresh_token().await);
    assert_eq!(seen.load(Ordering::SeqCst), 1);

    subscription.unsubscribe();
    assert!(tokens.refresh_token().await);
    assert_eq!(seen.load(Ordering::SeqCst), 1);
    tokens.dispose();
}
