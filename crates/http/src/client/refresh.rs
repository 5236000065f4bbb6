//! Single-flight access token renewal
//!
//! The coordinator is a two-state gate:
//!
//! - `Idle`: no renewal outstanding.
//! - `Refreshing`: one exchange with the renewal endpoint is in flight for a
//!   given refresh token. Every authentication failure observed in this state
//!   for the same refresh token awaits that exchange's result instead of
//!   starting another one.
//!
//! The exchange runs as a detached task, so it settles even if every request
//! waiting on it is dropped. When it completes, the session is updated
//! (renewed token stored, or credentials cleared and the session ended), the
//! gate returns to `Idle`, and only then is the outcome released to the
//! waiters. A waiter therefore never sees a half-updated session.
//!
//! The exchange itself is sent on the bare `reqwest` client. It never passes
//! through the interceptor or this coordinator, so a rejected renewal can
//! only end the session, never trigger another renewal.

use super::timer::deadline;
use crate::types::{RefreshRequest, RefreshResponse};
use careauth_core::{EndReason, Redacted, Session};
use futures::FutureExt;
use futures::channel::oneshot;
use futures::future::Shared;
use reqwest::StatusCode;
use reqwest::header::HeaderValue;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What a request that failed authentication should do next
#[derive(Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Replay the request once with this access token
    Renewed(String),
    /// Renewal is impossible; the session has been ended
    Rejected,
    /// The coordinator shut down before renewal finished
    Aborted,
}

impl RefreshOutcome {
    pub const fn is_renewed(&self) -> bool {
        matches!(self, Self::Renewed(_))
    }
}

impl fmt::Debug for RefreshOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Renewed(token) => f.debug_tuple("Renewed").field(&Redacted(token)).finish(),
            Self::Rejected => f.write_str("Rejected"),
            Self::Aborted => f.write_str("Aborted"),
        }
    }
}

/// Result of a detached exchange task, shared by all of its waiters
type Flight = Shared<oneshot::Receiver<RefreshOutcome>>;

enum RefreshState {
    Idle,
    Refreshing {
        id: u64,
        refresh: String,
        flight: Flight,
    },
}

#[derive(Debug, Error)]
enum ExchangeError {
    #[error("renewal endpoint rejected the refresh token ({0})")]
    Rejected(StatusCode),

    #[error("renewal endpoint returned {0}")]
    Status(StatusCode),

    #[error("renewal request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("renewal response could not be read: {0}")]
    Malformed(String),

    #[error("renewal did not finish within {0:?}")]
    Timeout(Duration),

    #[error("renewal aborted by shutdown")]
    Aborted,
}

impl ExchangeError {
    const fn end_reason(&self) -> EndReason {
        match self {
            Self::Rejected(_) => EndReason::RefreshRejected,
            _ => EndReason::RefreshUnavailable,
        }
    }
}

/// De-duplicates token renewal across concurrent authentication failures
pub struct RefreshCoordinator {
    session: Arc<Session>,
    http: reqwest::Client,
    refresh_url: String,
    timeout: Duration,
    state: Arc<Mutex<RefreshState>>,
    next_id: AtomicU64,
    exchanges: AtomicUsize,
    shutdown: CancellationToken,
}

impl RefreshCoordinator {
    /// Create a coordinator that renews through `refresh_url`
    ///
    /// `timeout` bounds each exchange; an exchange that exceeds it counts as
    /// failed.
    pub fn new(
        session: Arc<Session>,
        http: reqwest::Client,
        refresh_url: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            session,
            http,
            refresh_url: refresh_url.into(),
            timeout,
            state: Arc::new(Mutex::new(RefreshState::Idle)),
            next_id: AtomicU64::new(1),
            exchanges: AtomicUsize::new(0),
            shutdown: CancellationToken::new(),
        }
    }

    /// Whether a renewal exchange is outstanding
    pub fn is_refreshing(&self) -> bool {
        matches!(*self.state(), RefreshState::Refreshing { .. })
    }

    /// Number of renewal exchanges started so far
    pub fn exchanges(&self) -> usize {
        self.exchanges.load(Ordering::Relaxed)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Resolve an authentication failure for a request sent with `sent_with`
    ///
    /// The first failure seen while idle starts the exchange; failures seen
    /// while it is outstanding for the session's current refresh token wait
    /// for the same result. A failure for a request that carried an access
    /// token the session has already replaced is answered with the current
    /// token and no exchange.
    ///
    /// Native builds spawn the exchange on the ambient tokio runtime.
    pub async fn recover(&self, sent_with: Option<&str>) -> RefreshOutcome {
        match self.join_or_start(sent_with) {
            // A dropped sender means the task never finished
            Ok(flight) => flight.await.unwrap_or(RefreshOutcome::Aborted),
            Err(outcome) => outcome,
        }
    }

    /// Tear the coordinator down
    ///
    /// An outstanding exchange is abandoned and all of its waiters resolve as
    /// [`RefreshOutcome::Aborted`]. Stored credentials are left as they are.
    /// Later failures resolve immediately the same way.
    pub fn shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            info!("Refresh coordinator shutting down");
        }
        self.shutdown.cancel();
    }

    fn state(&self) -> MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn join_or_start(&self, sent_with: Option<&str>) -> Result<Flight, RefreshOutcome> {
        let mut state = self.state();

        if self.shutdown.is_cancelled() {
            return Err(RefreshOutcome::Aborted);
        }

        let credentials = self.session.credentials();

        if let RefreshState::Refreshing { id, refresh, flight } = &*state {
            if credentials.refresh.as_deref() == Some(refresh.as_str()) {
                debug!(flight = id, "Joining in-flight token renewal");
                return Ok(flight.clone());
            }
            // The session was replaced after this exchange started
            debug!(flight = id, "In-flight renewal belongs to a previous session");
        }

        // Only a token that actually went out can be stale. A request sent
        // without one (logged out, or a token that is not a valid header)
        // falls through to renewal.
        if let Some(current) = credentials.access
            && sent_with.is_some_and(|sent| sent != current)
        {
            debug!("Rejected request carried a superseded token, replaying with the current one");
            return Err(RefreshOutcome::Renewed(current));
        }

        let Some(refresh) = credentials.refresh else {
            info!("Authentication failed with no refresh token to renew with");
            self.session
                .end_session(None, EndReason::MissingRefreshToken);
            return Err(RefreshOutcome::Rejected);
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.exchanges.fetch_add(1, Ordering::Relaxed);
        info!(flight = id, "Starting token renewal");

        let flight = self.launch(id, refresh.clone());
        *state = RefreshState::Refreshing {
            id,
            refresh,
            flight: flight.clone(),
        };
        Ok(flight)
    }

    fn launch(&self, id: u64, refresh: String) -> Flight {
        let session = Arc::clone(&self.session);
        let gate = Arc::downgrade(&self.state);
        let http = self.http.clone();
        let url = self.refresh_url.clone();
        let timeout = self.timeout;
        let shutdown = self.shutdown.clone();
        let (done, flight) = oneshot::channel();

        spawn_detached(async move {
            let result = tokio::select! {
                biased;
                () = shutdown.cancelled() => Err(ExchangeError::Aborted),
                result = exchange(&http, &url, &refresh, timeout) => result,
            };

            let outcome = settle(&session, &refresh, result);
            reopen(&gate, id);
            debug!(flight = id, outcome = ?outcome, "Token renewal settled");
            // Nobody may be waiting any more
            let _ = done.send(outcome);
        });

        flight.shared()
    }
}

impl Drop for RefreshCoordinator {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("refresh_url", &self.refresh_url)
            .field("timeout", &self.timeout)
            .field("refreshing", &self.is_refreshing())
            .field("exchanges", &self.exchanges())
            .field("shut_down", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn spawn_detached(task: impl Future<Output = ()> + Send + 'static) {
    tokio::spawn(task);
}

#[cfg(target_arch = "wasm32")]
fn spawn_detached(task: impl Future<Output = ()> + 'static) {
    wasm_bindgen_futures::spawn_local(task);
}

/// Return the gate to idle if it still belongs to flight `id`
fn reopen(gate: &Weak<Mutex<RefreshState>>, id: u64) {
    let Some(gate) = gate.upgrade() else {
        return;
    };
    let mut state = gate.lock().unwrap_or_else(PoisonError::into_inner);
    if matches!(&*state, RefreshState::Refreshing { id: current, .. } if *current == id) {
        *state = RefreshState::Idle;
    }
}

/// Apply the exchange result to the session and pick the waiters' outcome
fn settle(
    session: &Session,
    refresh: &str,
    result: Result<RefreshResponse, ExchangeError>,
) -> RefreshOutcome {
    match result {
        Ok(renewed) => {
            let access = renewed.access.clone();
            if session.complete_refresh(refresh, renewed.access, renewed.refresh) {
                info!("Access token renewed");
                RefreshOutcome::Renewed(access)
            } else {
                // Logged out or logged in again while the exchange was outstanding
                session
                    .access_token()
                    .map_or(RefreshOutcome::Rejected, RefreshOutcome::Renewed)
            }
        }
        Err(ExchangeError::Aborted) => {
            info!("Token renewal abandoned on shutdown");
            RefreshOutcome::Aborted
        }
        Err(err) => {
            warn!(error = %err, "Token renewal failed, ending session");
            session.end_session(Some(refresh), err.end_reason());
            RefreshOutcome::Rejected
        }
    }
}

/// One renewal exchange, bounded by `timeout`
async fn exchange(
    http: &reqwest::Client,
    url: &str,
    refresh: &str,
    timeout: Duration,
) -> Result<RefreshResponse, ExchangeError> {
    let attempt = async {
        let response = http
            .post(url)
            .json(&RefreshRequest { refresh })
            .send()
            .await?;

        let status = response.status();
        if matches!(
            status,
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
        ) {
            return Err(ExchangeError::Rejected(status));
        }
        if !status.is_success() {
            return Err(ExchangeError::Status(status));
        }

        let body = response.bytes().await?;
        let renewed: RefreshResponse =
            serde_json::from_slice(&body).map_err(|e| ExchangeError::Malformed(e.to_string()))?;
        if renewed.access.is_empty() {
            return Err(ExchangeError::Malformed("empty access token".into()));
        }
        if HeaderValue::from_str(&format!("Bearer {}", renewed.access)).is_err() {
            return Err(ExchangeError::Malformed(
                "access token is not a valid header value".into(),
            ));
        }
        Ok(renewed)
    };

    deadline(timeout, attempt)
        .await
        .unwrap_or(Err(ExchangeError::Timeout(timeout)))
}
