//! CareAuth HTTP client

pub mod auth;
pub mod config;
pub mod error;
pub mod interceptor;
pub mod refresh;
mod timer;

pub use config::{ClientConfig, EndpointConfig};
pub use error::ClientError;
pub use interceptor::AuthInterceptor;
pub use refresh::{RefreshCoordinator, RefreshOutcome};

use careauth_core::{MemoryStore, Session};
use interceptor::attach_bearer;
use reqwest::{Client, ClientBuilder, Method, Request, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// API client bound to a [`Session`]
///
/// Requests built with [`request`](Self::request) and sent through
/// [`send`](Self::send) or [`execute`](Self::execute) carry the session's
/// access token. A request rejected as unauthenticated waits for a single
/// shared renewal and is replayed once with the renewed token.
#[derive(Clone)]
pub struct SessionClient {
    http: Client,
    base_url: String,
    config: ClientConfig,
    session: Arc<Session>,
    interceptor: AuthInterceptor,
    coordinator: Arc<RefreshCoordinator>,
}

impl SessionClient {
    /// Create a client for `base_url` with an in-memory session
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        Self::builder().base_url(base_url).build()
    }

    pub fn builder() -> SessionClientBuilder {
        SessionClientBuilder::default()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub const fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub const fn coordinator(&self) -> &Arc<RefreshCoordinator> {
        &self.coordinator
    }

    /// Absolute URL for an API path
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Start a request to `path`
    ///
    /// No token is attached here; that happens at dispatch time so a request
    /// built before a login still goes out with the new token.
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http.request(method, self.url(path))
    }

    /// Build and dispatch a request
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::AuthenticationFailed`] if the request is still
    /// unauthenticated after renewal, or renewal was impossible. Transport
    /// failures surface as [`ClientError::Request`]. Any other status is
    /// returned as a response for the caller to inspect.
    pub async fn send(&self, request: RequestBuilder) -> Result<Response, ClientError> {
        self.dispatch(request.build()?).await
    }

    /// Dispatch an already built request
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send)
    pub async fn dispatch(&self, mut request: Request) -> Result<Response, ClientError> {
        // Streaming bodies cannot be replayed
        let replay = request.try_clone();
        let sent_with = self.interceptor.authorize(&mut request);

        let response = self.http.execute(request).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }
        debug!(url = %response.url(), "Request rejected as unauthenticated");

        let token = match self.coordinator.recover(sent_with.as_deref()).await {
            RefreshOutcome::Renewed(token) => token,
            RefreshOutcome::Rejected | RefreshOutcome::Aborted => {
                return Err(auth_failure(response).await);
            }
        };

        let Some(mut replay) = replay else {
            warn!("Request body cannot be replayed after renewal");
            return Err(auth_failure(response).await);
        };
        attach_bearer(&mut replay, &token);

        let retried = self.http.execute(replay).await?;
        if retried.status() == StatusCode::UNAUTHORIZED {
            warn!(url = %retried.url(), "Request still unauthenticated after renewal");
            return Err(auth_failure(retried).await);
        }
        Ok(retried)
    }

    /// Send a request and decode a JSON response
    ///
    /// # Errors
    ///
    /// As [`send`](Self::send), plus a status-mapped error for any non-success
    /// response and [`ClientError::Serialization`] for a malformed body
    pub async fn execute<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, ClientError> {
        read_json(self.send(request).await?).await
    }

    /// Stop renewing tokens
    ///
    /// Requests waiting on a renewal fail with
    /// [`ClientError::AuthenticationFailed`]; the stored session is kept.
    pub fn shutdown(&self) {
        self.coordinator.shutdown();
    }
}

impl std::fmt::Debug for SessionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionClient")
            .field("base_url", &self.base_url)
            .field("authenticated", &self.session.is_authenticated())
            .field("coordinator", &self.coordinator)
            .finish_non_exhaustive()
    }
}

/// Decode a successful JSON response or map the status to an error
pub(crate) async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    let status = response.status();
    if status.is_success() {
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    } else {
        let message = response.text().await.unwrap_or_else(|_| status.to_string());
        Err(ClientError::from_status(status, message))
    }
}

async fn auth_failure(response: Response) -> ClientError {
    let status = response.status();
    let message = response.text().await.unwrap_or_default();
    if message.is_empty() {
        ClientError::AuthenticationFailed(status.to_string())
    } else {
        ClientError::AuthenticationFailed(message)
    }
}

/// Builder for [`SessionClient`]
#[derive(Default)]
pub struct SessionClientBuilder {
    config: ClientConfig,
    base_url: Option<String>,
    refresh_timeout: Option<Duration>,
    session: Option<Arc<Session>>,
    http: Option<Client>,
}

impl SessionClientBuilder {
    /// Start from a loaded configuration
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Override the configured API root
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Override the configured renewal deadline
    pub const fn refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = Some(timeout);
        self
    }

    /// Use an existing session, e.g. one restored from a persistent store
    ///
    /// Without one, the client starts logged out over an in-memory store
    /// using the configured key names.
    pub fn session(mut self, session: Arc<Session>) -> Self {
        self.session = Some(session);
        self
    }

    /// Use a preconfigured `reqwest` client
    pub fn http_client(mut self, client: Client) -> Self {
        self.http = Some(client);
        self
    }

    /// Build the client
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Configuration`] if the settings do not validate
    pub fn build(self) -> Result<SessionClient, ClientError> {
        let mut config = self.config;
        if let Some(base_url) = self.base_url {
            config.base_url = base_url;
        }
        if let Some(timeout) = self.refresh_timeout {
            config.refresh_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        }
        config.validate()?;

        let base_url = config.base_url.trim_end_matches('/').to_string();

        let http = match self.http {
            Some(client) => client,
            None => http_client(&config)?,
        };

        let session = self.session.unwrap_or_else(|| {
            Arc::new(Session::restore(
                Arc::new(MemoryStore::new()),
                config.storage.clone(),
            ))
        });

        let coordinator = Arc::new(RefreshCoordinator::new(
            Arc::clone(&session),
            http.clone(),
            format!("{base_url}{}", config.endpoints.refresh),
            config.refresh_timeout(),
        ));

        Ok(SessionClient {
            interceptor: AuthInterceptor::new(Arc::clone(&session)),
            http,
            base_url,
            config,
            session,
            coordinator,
        })
    }
}

fn http_client(config: &ClientConfig) -> Result<Client, ClientError> {
    let builder = ClientBuilder::new().user_agent(config.user_agent.clone());

    #[cfg(not(target_arch = "wasm32"))]
    let builder = match config.request_timeout() {
        Some(timeout) => builder.timeout(timeout),
        None => builder,
    };

    Ok(builder.build()?)
}
