//! CareAuth core types
//!
//! Holds the client-side [`Session`], the [`CredentialStore`] abstraction it
//! persists through, and the [`SessionEvent`] stream the UI layer listens to.

pub mod error;
pub mod event;
pub mod session;
pub mod store;
pub mod tokens;
pub mod tracing;
pub mod user;

pub use error::{SessionError, StoreError};
pub use event::{EndReason, SessionEvent};
pub use session::{Credentials, Session};
pub use store::{CredentialStore, MemoryStore, StoreKeys};
#[cfg(not(target_arch = "wasm32"))]
pub use store::FileStore;
pub use tokens::{Redacted, TokenPair};
pub use user::{SessionUser, UserType};
