//! Client configuration and initialization

use crate::config::AuthConfig;
use crate::navigation::redirect_on_session_end;
use crate::storage::WebStorageStore;
use careauth_core::Session;
use careauth_http::{ClientConfig, ClientError, SessionClient};
use std::sync::Arc;

/// Restore the persisted session and build a client around it
///
/// The session ends in a redirect to [`AuthConfig::LOGIN_PATH`].
///
/// # Errors
///
/// Returns [`ClientError::Configuration`] if `config` does not validate
pub fn connect(config: ClientConfig) -> Result<SessionClient, ClientError> {
    let store = Arc::new(WebStorageStore::local());
    let session = Arc::new(Session::restore(store, config.storage.clone()));

    let client = SessionClient::builder()
        .config(config)
        .session(Arc::clone(&session))
        .build()?;

    redirect_on_session_end(&session, AuthConfig::LOGIN_PATH);
    Ok(client)
}

/// [`connect`] with the build-time configuration
///
/// # Errors
///
/// See [`connect`]
pub fn connect_default() -> Result<SessionClient, ClientError> {
    connect(AuthConfig::client_config())
}
