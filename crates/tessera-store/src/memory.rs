//! In-memory credential store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use serde_json::Value;

use tessera_core::error::StoreError;
use tessera_core::traits::CredentialStore;

/// Credential store that lives only as long as the process.
///
/// Cloning yields another handle to the same map. Writes can be forced to
/// fail with [`set_fail_writes`](Self::set_fail_writes) to exercise
/// persistence-error paths.
#[derive(Debug, Clone, Default)]
pub struct MemoryCredentialStore {
    inner: Arc<MemoryInner>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    values: RwLock<HashMap<String, Value>>,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `set` fail with [`StoreError::Unavailable`].
    pub fn set_fail_writes(&self, fail: bool) {
        self.inner.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful `set` calls.
    pub fn write_count(&self) -> usize {
        self.inner.writes.load(Ordering::SeqCst)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.read(key).is_some()
    }

    fn read(&self, key: &str) -> Option<Value> {
        self.inner
            .values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.read(key))
    }

    fn get_sync(&self, key: &str) -> Option<Value> {
        self.read(key)
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        if self.inner.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable {
                message: format!("write to '{key}' rejected"),
            });
        }
        self.inner
            .values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value);
        self.inner.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.inner
            .values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }
}
