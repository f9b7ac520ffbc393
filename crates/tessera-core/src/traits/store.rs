//! Credential store trait.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StoreError;

/// Durable key/value persistence for credentials.
///
/// Values are JSON documents; typed encoding happens at the call site.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Read a value. A missing key is `Ok(None)`.
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Best-effort synchronous read.
    ///
    /// Must never block on the network and never fail outward: any error is
    /// swallowed and reported as `None`. Callers must treat the result as a
    /// hint only.
    fn get_sync(&self, key: &str) -> Option<Value>;

    /// Write a value, replacing any previous one.
    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;

    /// Remove a value. Removing a missing key succeeds.
    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}
