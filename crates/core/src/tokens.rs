//! Opaque bearer credentials
//!
//! Tokens are never decoded here. Expiry is learned only from the server
//! rejecting a request, so the only thing this module does is keep the raw
//! strings out of logs.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A freshly issued access/refresh pair, as returned by login or registration
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

impl TokenPair {
    pub fn new(access: impl Into<String>, refresh: impl Into<String>) -> Self {
        Self {
            access: access.into(),
            refresh: refresh.into(),
        }
    }
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access", &Redacted(&self.access))
            .field("refresh", &Redacted(&self.refresh))
            .finish()
    }
}

/// Formats a token as its length only
#[derive(Clone, Copy)]
pub struct Redacted<'a>(pub &'a str);

impl fmt::Debug for Redacted<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Redacted<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<redacted, {} chars>", self.0.len())
    }
}
