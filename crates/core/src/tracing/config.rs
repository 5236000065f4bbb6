//! Configuration for log output

use serde::{Deserialize, Serialize};

/// Main instrumentation configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentationConfig {
    /// Service name attached to the startup log line
    pub service_name: String,
    /// Log level filter (e.g., "info", "careauth_http=debug")
    pub log_level: String,
    /// Include module targets in each line
    #[serde(default = "default_true")]
    pub with_target: bool,
}

const fn default_true() -> bool {
    true
}

impl Default for InstrumentationConfig {
    fn default() -> Self {
        Self {
            service_name: "careauth".to_string(),
            log_level: "info".to_string(),
            with_target: true,
        }
    }
}

impl InstrumentationConfig {
    /// Create configuration from environment variables
    ///
    /// Supports the following environment variables:
    /// - `CAREAUTH_SERVICE_NAME`: Service name
    /// - `RUST_LOG` or `CAREAUTH_LOG`: Log level filter
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let service_name =
            std::env::var("CAREAUTH_SERVICE_NAME").unwrap_or(defaults.service_name);

        let log_level = std::env::var("RUST_LOG")
            .or_else(|_| std::env::var("CAREAUTH_LOG"))
            .unwrap_or(defaults.log_level);

        Self {
            service_name,
            log_level,
            with_target: defaults.with_target,
        }
    }

    /// Create a development configuration with verbose client logs
    pub fn dev() -> Self {
        Self {
            service_name: "careauth-dev".to_string(),
            log_level: "careauth_core=debug,careauth_http=debug,info".to_string(),
            with_target: true,
        }
    }
}
