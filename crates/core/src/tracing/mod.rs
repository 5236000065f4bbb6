//! Log setup for native builds
//!
//! Browser builds install their subscriber from the frontend crate.

#[cfg(not(target_arch = "wasm32"))]
pub mod config;
#[cfg(not(target_arch = "wasm32"))]
pub mod init;

#[cfg(not(target_arch = "wasm32"))]
pub use config::InstrumentationConfig;
#[cfg(not(target_arch = "wasm32"))]
pub use init::{init_default, init_tracing};
