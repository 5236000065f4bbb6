//! Reacting to the end of a session
//!
//! Any session end (logout, rejected renewal, missing refresh token) sends
//! the user back to the login view. The listener runs on the browser event
//! loop for as long as the session exists.

use careauth_core::{EndReason, Session, SessionEvent};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use wasm_bindgen_futures::spawn_local;

/// Run `callback` every time the session ends
pub fn on_session_end<F>(session: &Session, callback: F)
where
    F: Fn(EndReason) + 'static,
{
    let mut events = session.subscribe();
    spawn_local(async move {
        loop {
            match events.recv().await {
                Ok(SessionEvent::Ended(reason)) => callback(reason),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Session event listener fell behind");
                }
                Err(RecvError::Closed) => {
                    debug!("Session dropped, stopping session end listener");
                    break;
                }
            }
        }
    });
}

/// Navigate to `login_path` whenever the session ends
pub fn redirect_on_session_end(session: &Session, login_path: impl Into<String>) {
    let login_path = login_path.into();
    on_session_end(session, move |reason| {
        info!(?reason, "Session ended, returning to login");
        navigate(&login_path);
    });
}

/// Point the window at `path`, unless it is already there
pub fn navigate(path: &str) {
    let Some(window) = web_sys::window() else {
        warn!("No window to navigate");
        return;
    };
    let location = window.location();

    if location.pathname().is_ok_and(|current| current == path) {
        return;
    }
    if let Err(err) = location.set_href(path) {
        warn!(?err, path, "Navigation failed");
    }
}
