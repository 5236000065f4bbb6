//! Persisted credential storage
//!
//! The store is an external collaborator: browser `localStorage`, a file, or an
//! OS keychain. [`Session`](crate::Session) is the only writer.

#[cfg(not(target_arch = "wasm32"))]
mod file;
mod memory;

#[cfg(not(target_arch = "wasm32"))]
pub use file::FileStore;
pub use memory::MemoryStore;

use crate::StoreError;
use serde::{Deserialize, Serialize};

/// Key/value storage for the two opaque token strings
pub trait CredentialStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// Stable key names for the access and refresh token
///
/// Every read and write path goes through the same pair of names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreKeys {
    pub access: String,
    pub refresh: String,
}

impl StoreKeys {
    pub const DEFAULT_ACCESS: &'static str = "access-token";
    pub const DEFAULT_REFRESH: &'static str = "refresh-token";
}

impl Default for StoreKeys {
    fn default() -> Self {
        Self {
            access: Self::DEFAULT_ACCESS.to_string(),
            refresh: Self::DEFAULT_REFRESH.to_string(),
        }
    }
}
