//! Session lifecycle notifications
//!
//! The navigation layer subscribes through [`Session::subscribe`](crate::Session::subscribe)
//! and redirects to its unauthenticated view on [`SessionEvent::Ended`].

/// Why a session was torn down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndReason {
    /// Explicit logout by the application
    Logout,
    /// The renewal endpoint refused the refresh token
    RefreshRejected,
    /// The renewal exchange could not complete (transport error, timeout, bad payload)
    RefreshUnavailable,
    /// Authentication failed and there was no refresh token to renew with
    MissingRefreshToken,
    /// The credential store refused a login write
    StoreFailure,
}

/// Events broadcast by a [`Session`](crate::Session)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    LoggedIn,
    Refreshed,
    Ended(EndReason),
}

impl SessionEvent {
    /// Whether this is the "session ended" notification
    pub const fn is_session_end(&self) -> bool {
        matches!(self, Self::Ended(_))
    }
}
