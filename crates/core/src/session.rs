//! Client session state and its lifecycle transitions
//!
//! A [`Session`] is the in-memory source of truth for the token pair. It is
//! created once at process start, shared behind an `Arc`, and written by
//! exactly two parties:
//!
//! - the application, through [`Session::login`] and [`Session::logout`];
//! - the refresh coordinator, through [`Session::complete_refresh`] and
//!   [`Session::end_session`].
//!
//! Every read and write of the pair happens under one lock and the
//! write-through to the [`CredentialStore`] happens while that lock is held,
//! so no reader can observe a half-written pair.

use crate::{
    CredentialStore, EndReason, Redacted, SessionError, SessionEvent, SessionUser, StoreKeys,
    StoreError, TokenPair,
};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

const EVENT_CAPACITY: usize = 16;

/// Snapshot of the token pair
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub access: Option<String>,
    pub refresh: Option<String>,
}

impl Credentials {
    pub const fn is_empty(&self) -> bool {
        self.access.is_none() && self.refresh.is_none()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access", &self.access.as_deref().map(Redacted))
            .field("refresh", &self.refresh.as_deref().map(Redacted))
            .finish()
    }
}

#[derive(Default)]
struct SessionState {
    credentials: Credentials,
    user: Option<SessionUser>,
}

/// The client's authentication session
pub struct Session {
    store: Arc<dyn CredentialStore>,
    keys: StoreKeys,
    state: Mutex<SessionState>,
    events: broadcast::Sender<SessionEvent>,
}

impl Session {
    /// Restore the session from the default store keys
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self::restore(store, StoreKeys::default())
    }

    /// Restore the session persisted in `store`
    ///
    /// The session is considered authenticated as soon as an access token is
    /// present. Nothing is validated over the network here; an expired token
    /// is discovered on the first rejected request.
    pub fn restore(store: Arc<dyn CredentialStore>, keys: StoreKeys) -> Self {
        let credentials = Credentials {
            access: read_token(store.as_ref(), &keys.access),
            refresh: read_token(store.as_ref(), &keys.refresh),
        };

        info!(
            authenticated = credentials.access.is_some(),
            has_refresh_token = credentials.refresh.is_some(),
            "Session restored from credential store"
        );

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store,
            keys,
            state: Mutex::new(SessionState {
                credentials,
                user: None,
            }),
            events,
        }
    }

    /// True iff an access token is held
    pub fn is_authenticated(&self) -> bool {
        self.state().credentials.access.is_some()
    }

    pub fn access_token(&self) -> Option<String> {
        self.state().credentials.access.clone()
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.state().credentials.refresh.clone()
    }

    /// Both tokens, read together
    pub fn credentials(&self) -> Credentials {
        self.state().credentials.clone()
    }

    pub fn user(&self) -> Option<SessionUser> {
        self.state().user.clone()
    }

    pub const fn keys(&self) -> &StoreKeys {
        &self.keys
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Start a session from a freshly issued token pair
    pub fn login(&self, tokens: TokenPair) -> Result<(), SessionError> {
        self.login_with_user(tokens, None)
    }

    /// Start a session and remember the account it belongs to
    ///
    /// The pair is persisted before the in-memory state changes. If the store
    /// refuses either write, whatever was written is removed, the session is
    /// left logged out and the store error is returned.
    pub fn login_with_user(
        &self,
        tokens: TokenPair,
        user: Option<SessionUser>,
    ) -> Result<(), SessionError> {
        if tokens.access.is_empty() {
            return Err(SessionError::EmptyToken("access"));
        }
        let refresh = Some(tokens.refresh).filter(|token| !token.is_empty());

        let mut state = self.state();
        let was_active = !state.credentials.is_empty();

        if let Err(err) = self.persist(&tokens.access, refresh.as_deref()) {
            error!(error = %err, "Failed to persist credentials on login");
            self.discard_persisted();
            *state = SessionState::default();
            drop(state);

            if was_active {
                self.notify(SessionEvent::Ended(EndReason::StoreFailure));
            }
            return Err(err.into());
        }

        *state = SessionState {
            credentials: Credentials {
                access: Some(tokens.access),
                refresh,
            },
            user,
        };
        drop(state);

        info!("Session started");
        self.notify(SessionEvent::LoggedIn);
        Ok(())
    }

    /// End the session on the user's request
    ///
    /// Calling this while already logged out leaves the same end state and
    /// emits nothing.
    pub fn logout(&self) {
        let ended = {
            let mut state = self.state();
            self.clear(&mut state)
        };

        if ended {
            info!("Session ended by logout");
            self.notify(SessionEvent::Ended(EndReason::Logout));
        } else {
            debug!("Logout requested with no active session");
        }
    }

    /// Install an access token renewed with `used_refresh`
    ///
    /// The refresh token is replaced only when the server rotated it. Returns
    /// `false` without touching anything if the session no longer holds
    /// `used_refresh`, i.e. it was logged out or replaced while the exchange
    /// was outstanding.
    ///
    /// A store write failure here is logged but not fatal: the renewed token
    /// is still valid for this process.
    pub fn complete_refresh(
        &self,
        used_refresh: &str,
        access: String,
        rotated_refresh: Option<String>,
    ) -> bool {
        {
            let mut state = self.state();
            if state.credentials.refresh.as_deref() != Some(used_refresh) {
                debug!("Session changed during renewal, discarding renewed token");
                return false;
            }

            let rotated = rotated_refresh.filter(|token| !token.is_empty() && token != used_refresh);

            if let Err(err) = self.store.set(&self.keys.access, &access) {
                warn!(error = %err, "Failed to persist renewed access token");
            }
            if let Some(refresh) = &rotated
                && let Err(err) = self.store.set(&self.keys.refresh, refresh)
            {
                warn!(error = %err, "Failed to persist rotated refresh token");
            }

            debug!(rotated = rotated.is_some(), "Renewed access token installed");
            state.credentials.access = Some(access);
            if let Some(refresh) = rotated {
                state.credentials.refresh = Some(refresh);
            }
        }

        self.notify(SessionEvent::Refreshed);
        true
    }

    /// End the session after an irrecoverable authentication failure
    ///
    /// `expected_refresh` is the refresh token the caller saw when it gave up.
    /// If the session has moved on since then, nothing is touched. Returns
    /// whether this call ended a session; the "session ended" event fires only
    /// in that case, so it fires once per session.
    pub fn end_session(&self, expected_refresh: Option<&str>, reason: EndReason) -> bool {
        let ended = {
            let mut state = self.state();
            if state.credentials.refresh.as_deref() != expected_refresh {
                debug!(?reason, "Session changed since the failure, leaving it in place");
                return false;
            }
            self.clear(&mut state)
        };

        if ended {
            warn!(?reason, "Session ended");
            self.notify(SessionEvent::Ended(reason));
        }
        ended
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, access: &str, refresh: Option<&str>) -> Result<(), StoreError> {
        self.store.set(&self.keys.access, access)?;
        match refresh {
            Some(refresh) => self.store.set(&self.keys.refresh, refresh),
            None => self.store.remove(&self.keys.refresh),
        }
    }

    /// Drop both tokens and the user. Returns whether anything was held.
    fn clear(&self, state: &mut SessionState) -> bool {
        let was_active = !state.credentials.is_empty();
        self.discard_persisted();
        *state = SessionState::default();
        was_active
    }

    fn discard_persisted(&self) {
        for key in [&self.keys.access, &self.keys.refresh] {
            if let Err(err) = self.store.remove(key) {
                warn!(key = %key, error = %err, "Failed to remove credential");
            }
        }
    }

    fn notify(&self, event: SessionEvent) {
        let ended = event.is_session_end();
        // No subscribers is fine, but nobody will leave the authenticated view
        if self.events.send(event).is_err() && ended {
            debug!("Session ended with no listener subscribed");
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("Session")
            .field("keys", &self.keys)
            .field("credentials", &state.credentials)
            .field("user", &state.user)
            .finish_non_exhaustive()
    }
}

fn read_token(store: &dyn CredentialStore, key: &str) -> Option<String> {
    match store.get(key) {
        Ok(value) => value.filter(|token| !token.is_empty()),
        Err(err) => {
            warn!(key, error = %err, "Failed to read credential, treating it as absent");
            None
        }
    }
}
