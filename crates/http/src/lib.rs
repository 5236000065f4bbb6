//! CareAuth HTTP client
//!
//! Wraps a `reqwest` client so that every request carries the session's
//! access token, an expired token is renewed once no matter how many requests
//! notice it at the same time, and rejected requests are replayed once with
//! the renewed token.

pub mod client;
pub mod types;

pub use client::{
    AuthInterceptor, ClientConfig, ClientError, EndpointConfig, RefreshCoordinator,
    RefreshOutcome, SessionClient, SessionClientBuilder,
};
pub use types::{LoginRequest, RegisterRequest, TokenGrant};

pub use careauth_core::{EndReason, Session, SessionEvent, TokenPair};
