//! tessera-store - Credential store backends.
//!
//! [`MemoryCredentialStore`] keeps credentials for the life of the process;
//! [`FileCredentialStore`] persists them as JSON files under a directory.

mod file;
mod memory;

pub use file::FileCredentialStore;
pub use memory::MemoryCredentialStore;
