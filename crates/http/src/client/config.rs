//! Client configuration

use super::ClientError;
use careauth_core::StoreKeys;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings for a [`SessionClient`](super::SessionClient)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// API root every path is appended to
    pub base_url: String,

    /// Per-request timeout in seconds (native builds only)
    pub request_timeout_secs: Option<u64>,

    /// Deadline for the token renewal exchange in milliseconds
    pub refresh_timeout_ms: u64,

    /// Authentication endpoint paths
    pub endpoints: EndpointConfig,

    /// Credential store key names
    pub storage: StoreKeys,

    pub user_agent: String,
}

/// Paths of the authentication endpoints, relative to `base_url`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub login: String,
    pub register: String,
    pub refresh: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/api".to_string(),
            request_timeout_secs: Some(30),
            refresh_timeout_ms: 10_000,
            endpoints: EndpointConfig::default(),
            storage: StoreKeys::default(),
            user_agent: concat!("careauth/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            login: "/auth/login/".to_string(),
            register: "/auth/register/".to_string(),
            refresh: "/token/refresh/".to_string(),
        }
    }
}

impl ClientConfig {
    /// Config for the given API root with default endpoints
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub const fn refresh_timeout(&self) -> Duration {
        Duration::from_millis(self.refresh_timeout_ms)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    /// Check the settings before a client is built
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Configuration`] for a malformed base URL, a zero
    /// renewal deadline, empty store keys or an endpoint not starting with `/`
    pub fn validate(&self) -> Result<(), ClientError> {
        let url = url::Url::parse(&self.base_url).map_err(|e| {
            ClientError::Configuration(format!("base_url {:?} is invalid: {e}", self.base_url))
        })?;
        if url.cannot_be_a_base() {
            return Err(ClientError::Configuration(format!(
                "base_url {:?} cannot be used as a base",
                self.base_url
            )));
        }

        if self.refresh_timeout_ms == 0 {
            return Err(ClientError::Configuration(
                "refresh_timeout_ms must be greater than zero".into(),
            ));
        }

        if self.storage.access.is_empty() || self.storage.refresh.is_empty() {
            return Err(ClientError::Configuration(
                "storage keys must not be empty".into(),
            ));
        }
        if self.storage.access == self.storage.refresh {
            return Err(ClientError::Configuration(
                "access and refresh tokens need distinct storage keys".into(),
            ));
        }

        for (name, path) in [
            ("login", &self.endpoints.login),
            ("register", &self.endpoints.register),
            ("refresh", &self.endpoints.refresh),
        ] {
            if !path.starts_with('/') {
                return Err(ClientError::Configuration(format!(
                    "{name} endpoint {path:?} must start with '/'"
                )));
            }
        }

        Ok(())
    }

    /// Load configuration from a file, with `CAREAUTH__*` environment overrides
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed
    #[cfg(not(target_arch = "wasm32"))]
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self, ClientError> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(env_source())
            .build()
            .map_err(config_error)?;

        settings.try_deserialize().map_err(config_error)
    }

    /// Load configuration with defaults and environment variables
    ///
    /// Nested keys use a double underscore, e.g. `CAREAUTH__ENDPOINTS__REFRESH`.
    ///
    /// # Errors
    ///
    /// Returns an error if environment variables cannot be parsed
    #[cfg(not(target_arch = "wasm32"))]
    pub fn from_env() -> Result<Self, ClientError> {
        let settings = config::Config::builder()
            .add_source(env_source())
            .build()
            .map_err(config_error)?;

        settings.try_deserialize().map_err(config_error)
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn env_source() -> config::Environment {
    config::Environment::with_prefix("CAREAUTH")
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
}

#[cfg(not(target_arch = "wasm32"))]
fn config_error(err: config::ConfigError) -> ClientError {
    ClientError::Configuration(err.to_string())
}
