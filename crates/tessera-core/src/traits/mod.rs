//! Collaborator traits: credential persistence and HTTP transport.

mod store;
mod transport;

pub use store::CredentialStore;
pub use transport::{HttpRequest, HttpResponse, HttpTransport, Method};
