//! Credential store backed by the browser's Web Storage

use careauth_core::{CredentialStore, StoreError};
use wasm_bindgen::JsValue;
use web_sys::Storage;

/// Which Web Storage area to use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StorageArea {
    /// `window.localStorage`, survives reloads and restarts
    #[default]
    Local,
    /// `window.sessionStorage`, scoped to the tab
    Session,
}

/// Stores tokens as raw strings under their key names
///
/// Values are written verbatim, not JSON-encoded, so tokens written by other
/// scripts on the same origin under the same keys are read back as is.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebStorageStore {
    area: StorageArea,
}

impl WebStorageStore {
    pub const fn local() -> Self {
        Self {
            area: StorageArea::Local,
        }
    }

    pub const fn session() -> Self {
        Self {
            area: StorageArea::Session,
        }
    }

    pub const fn area(&self) -> StorageArea {
        self.area
    }

    // Looked up per call: `Storage` is a JS handle and cannot be shared
    // across threads.
    fn storage(&self) -> Result<Storage, StoreError> {
        let window =
            web_sys::window().ok_or_else(|| StoreError::unavailable("no window object"))?;
        let storage = match self.area {
            StorageArea::Local => window.local_storage(),
            StorageArea::Session => window.session_storage(),
        };
        storage
            .map_err(|e| js_error("storage access denied", &e))?
            .ok_or_else(|| StoreError::unavailable("web storage is disabled"))
    }
}

impl CredentialStore for WebStorageStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.storage()?
            .get_item(key)
            .map_err(|e| js_error("read failed", &e))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        // Quota exhaustion surfaces here
        self.storage()?
            .set_item(key, value)
            .map_err(|e| js_error("write failed", &e))
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.storage()?
            .remove_item(key)
            .map_err(|e| js_error("remove failed", &e))
    }
}

fn js_error(context: &str, value: &JsValue) -> StoreError {
    let detail = value.as_string().unwrap_or_else(|| format!("{value:?}"));
    StoreError::unavailable(format!("{context}: {detail}"))
}
