//! Session wiring: configuration, credential store and service.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use tracing::debug;

use tessera_core::ClientConfig;
use tessera_core::config::DEFAULT_STORAGE_KEY;
use tessera_http::AuthService;
use tessera_store::FileCredentialStore;

use crate::cli::GlobalArgs;

/// Default session directory under the platform data dir.
fn default_data_dir() -> Result<PathBuf> {
    let dirs =
        ProjectDirs::from("", "", "tessera").context("Could not determine data directory")?;
    Ok(dirs.data_dir().join("sessions"))
}

/// Build the service and restore any stored session.
pub async fn connect(args: &GlobalArgs) -> Result<AuthService> {
    let mut config = ClientConfig::from_url(&args.api_url).context("Invalid API URL")?;
    config.user_agent = format!("tessera-cli/{}", env!("TESSERA_VERSION"));
    // One stored session per API host.
    let storage_key = config
        .base_url
        .host()
        .map(|host| format!("{DEFAULT_STORAGE_KEY}-{host}"));
    if let Some(key) = storage_key {
        config = config.with_storage_key(key);
    }

    let data_dir = match &args.data_dir {
        Some(dir) => dir.clone(),
        None => default_data_dir()?,
    };
    debug!(data_dir = %data_dir.display(), storage_key = %config.storage_key, "using session store");

    let store = Arc::new(FileCredentialStore::new(data_dir));
    let session = AuthService::connect(config, store).context("Failed to set up API client")?;
    session.init().await;
    Ok(session)
}
