//! Frontend configuration

use careauth_http::ClientConfig;

/// Authentication configuration
pub struct AuthConfig;

impl AuthConfig {
    /// Unauthenticated view users are sent to when a session ends
    pub const LOGIN_PATH: &'static str = "/login";

    /// API root baked in at build time, e.g. `CAREAUTH_API_BASE_URL=https://api.example.org/api`
    pub const API_BASE_URL: Option<&'static str> = option_env!("CAREAUTH_API_BASE_URL");

    /// Client settings for the browser build
    pub fn client_config() -> ClientConfig {
        Self::API_BASE_URL.map_or_else(ClientConfig::default, ClientConfig::new)
    }
}
