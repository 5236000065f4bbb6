//! Bearer token attachment

use careauth_core::Session;
use reqwest::Request;
use reqwest::header::{AUTHORIZATION, HeaderValue};
use std::sync::Arc;
use tracing::warn;

/// Decorates outgoing requests with the session's access token
///
/// Runs immediately before dispatch. It only reads the session; it never
/// looks at the URL or body and never decides whether a request succeeded.
#[derive(Clone, Debug)]
pub struct AuthInterceptor {
    session: Arc<Session>,
}

impl AuthInterceptor {
    pub const fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    /// Attach the current access token, if there is one
    ///
    /// Without a token the request is left exactly as it was. Returns the
    /// token that was attached.
    pub fn authorize(&self, request: &mut Request) -> Option<String> {
        let token = self.session.access_token()?;
        attach_bearer(request, &token).then_some(token)
    }
}

/// Set `Authorization: Bearer <token>`. Returns false if the token is not a
/// valid header value, in which case the request is not modified.
pub(crate) fn attach_bearer(request: &mut Request, token: &str) -> bool {
    match HeaderValue::from_str(&format!("Bearer {token}")) {
        Ok(mut value) => {
            value.set_sensitive(true);
            request.headers_mut().insert(AUTHORIZATION, value);
            true
        }
        Err(_) => {
            warn!("Access token contains characters not allowed in a header, sending without it");
            false
        }
    }
}
