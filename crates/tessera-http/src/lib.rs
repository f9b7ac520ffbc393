//! tessera-http - Token lifecycle and authenticated requests over HTTP.
//!
//! [`TokenManager`] owns the credential set and its refresh schedule,
//! [`ApiClient`] attaches the bearer token to requests and recovers from a
//! 401 with a single shared refresh, and [`AuthService`] wraps both into a
//! login/logout session facade. [`ReqwestTransport`] is the production
//! [`HttpTransport`](tessera_core::HttpTransport).

use std::sync::{Mutex, MutexGuard, PoisonError};

mod auth;
mod client;
pub mod endpoints;
mod manager;
mod transport;

pub use auth::AuthService;
pub use client::{ApiClient, ApiResponse, RequestOptions};
pub use manager::TokenManager;
pub use transport::ReqwestTransport;

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
