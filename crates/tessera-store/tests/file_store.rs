//! Filesystem store tests.

use serde_json::json;
use tempfile::TempDir;
use tessera_core::CredentialStore;
use tessera_store::FileCredentialStore;

#[tokio::test]
async fn round_trips_through_disk() {
    let dir = TempDir::new().unwrap();
    let store = FileCredentialStore::new(dir.path().join("creds"));

    assert_eq!(store.get("auth_tokens").await.unwrap(), None);
    assert_eq!(store.get_sync("auth_tokens"), None);

    let value = json!({"access_token": "abc", "expires_in": 3600});
    store.set("auth_tokens", value.clone()).await.unwrap();

    assert_eq!(store.get("auth_tokens").await.unwrap(), Some(value.clone()));
    assert_eq!(store.get_sync("auth_tokens"), Some(value.clone()));

    // A second handle on the same directory sees the write.
    let other = FileCredentialStore::new(dir.path().join("creds"));
    assert_eq!(other.get("auth_tokens").await.unwrap(), Some(value));
}

#[tokio::test]
async fn remove_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let store = FileCredentialStore::new(dir.path());

    store.remove("auth_tokens").await.unwrap();
    store.set("auth_tokens", json!({"a": 1})).await.unwrap();
    store.remove("auth_tokens").await.unwrap();
    store.remove("auth_tokens").await.unwrap();

    assert_eq!(store.get("auth_tokens").await.unwrap(), None);
}

#[tokio::test]
async fn corrupt_file_fails_async_read_but_not_sync_read() {
    let dir = TempDir::new().unwrap();
    let store = FileCredentialStore::new(dir.path());
    std::fs::write(dir.path().join("auth_tokens.json"), b"{not json").unwrap();

    assert!(store.get("auth_tokens").await.is_err());
    assert_eq!(store.get_sync("auth_tokens"), None);
}

#[tokio::test]
async fn concurrent_writers_leave_a_complete_file() {
    let dir = TempDir::new().unwrap();
    let store = FileCredentialStore::new(dir.path());

    let mut handles = Vec::new();
    for i in 0..16 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let padding = "x".repeat(i * 64);
            store
                .set("auth_tokens", json!({"writer": i, "padding": padding}))
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let stored = store.get("auth_tokens").await.unwrap().unwrap();
    let writer = stored["writer"].as_u64().unwrap() as usize;
    assert_eq!(stored["padding"].as_str().unwrap().len(), writer * 64);

    let leftovers: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn files_are_private() {
    use std::os::unix::fs::PermissionsExt;

    let dir = TempDir::new().unwrap();
    let store = FileCredentialStore::new(dir.path());
    store.set("auth_tokens", json!({})).await.unwrap();

    let mode = std::fs::metadata(dir.path().join("auth_tokens.json"))
        .unwrap()
        .permissions()
        .mode();
    assert_eq!(mode & 0o777, 0o600);
}
