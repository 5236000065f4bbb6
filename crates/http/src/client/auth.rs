//! Login, registration and logout

use super::{ClientError, SessionClient, read_json};
use crate::types::{LoginRequest, RegisterRequest, TokenGrant};
use tracing::info;

impl SessionClient {
    /// Exchange credentials for a token pair and start the session
    ///
    /// The request is sent without a bearer token, and a rejection is
    /// returned as is: a failed login never triggers a renewal.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::AuthenticationFailed`] for wrong credentials,
    /// or [`ClientError::Session`] if the tokens could not be stored
    pub async fn login(&self, credentials: &LoginRequest) -> Result<TokenGrant, ClientError> {
        let grant = self.grant(&self.config.endpoints.login, credentials).await?;
        info!(username = %credentials.username, "Logged in");
        Ok(grant)
    }

    /// Create an account; the server answers with a token pair for it
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::BadRequest`] with the server's field errors if
    /// the account was refused
    pub async fn register(&self, account: &RegisterRequest) -> Result<TokenGrant, ClientError> {
        let grant = self.grant(&self.config.endpoints.register, account).await?;
        info!(username = %account.username, user_type = ?account.user_type, "Registered");
        Ok(grant)
    }

    /// Drop the session's credentials
    pub fn logout(&self) {
        self.session.logout();
    }

    async fn grant<B: serde::Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<TokenGrant, ClientError> {
        let response = self.http.post(self.url(path)).json(body).send().await?;
        let grant: TokenGrant = read_json(response).await?;
        self.session
            .login_with_user(grant.tokens.clone(), grant.user.clone())?;
        Ok(grant)
    }
}
