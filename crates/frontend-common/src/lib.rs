//! Browser integration for the CareAuth client

pub mod client;
pub mod config;
pub mod logging;
pub mod navigation;
pub mod storage;

pub use careauth_http::ClientError;
pub use client::{connect, connect_default};
pub use config::AuthConfig;
pub use logging::init_logging;
pub use navigation::{on_session_end, redirect_on_session_end};
pub use storage::{StorageArea, WebStorageStore};
