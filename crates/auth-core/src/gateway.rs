//! Boundary adapter for privileged backend calls.
//!
//! Callers never touch tokens or retry policy themselves: the gateway
//! attaches the current access token, and on a server-side rejection
//! refreshes and retries exactly once. A rejection after that refresh
//! forces a sign-out and surfaces [`AuthError::Unauthorized`].

use crate::backend::SecondFactorSetup;
use crate::error::{AuthError, AuthResult};
use crate::identity::Identity;
use crate::session::SessionManager;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// Per-call bookkeeping. The retry decision is an explicit flag, not an
/// attempt counter, so a call can never refresh-loop.
#[derive(Debug, Default, Clone, Copy)]
pub struct CallContext {
    /// Whether this call has already been retried after a refresh.
    pub retried: bool,
}

/// Attaches credentials to privileged operations.
#[derive(Clone)]
pub struct Gateway {
    session: Arc<SessionManager>,
}

impl Gateway {
    pub fn new(session: Arc<SessionManager>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    /// Run `op` with a valid access token.
    ///
    /// On [`AuthError::TokenRejected`] the token is refreshed and the
    /// operation retried once; a second rejection signs the session out
    /// and surfaces [`AuthError::Unauthorized`]. Every other error
    /// passes through untouched.
    pub async fn call<T, F, Fut>(&self, op: F) -> AuthResult<T>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = AuthResult<T>>,
    {
        let mut ctx = CallContext::default();
        loop {
            let token = self.session.access_token().await?;
            match op(token.clone()).await {
                Err(AuthError::TokenRejected(reason)) => {
                    if ctx.retried {
                        warn!("Access token rejected after refresh, forcing sign-out");
                        let _ = self.session.logout().await;
                        return Err(AuthError::Unauthorized);
                    }
                    debug!(%reason, "Access token rejected, refreshing and retrying once");
                    ctx.retried = true;
                    self.session.refresh_rejected(&token).await?;
                }
                other => return other,
            }
        }
    }

    /// Fetch the identity behind the current session.
    pub async fn who_am_i(&self) -> AuthResult<Identity> {
        let backend = self.session.backend();
        self.call(move |token| {
            let backend = Arc::clone(&backend);
            async move { backend.who_am_i(&token).await }
        })
        .await
    }

    /// Change the account password. The server revokes other sessions.
    pub async fn change_password(
        &self,
        current_password: &str,
        new_password: &str,
    ) -> AuthResult<()> {
        let backend = self.session.backend();
        let current = current_password.to_string();
        let new = new_password.to_string();
        self.call(move |token| {
            let backend = Arc::clone(&backend);
            let current = current.clone();
            let new = new.clone();
            async move { backend.change_password(&token, &current, &new).await }
        })
        .await
    }

    /// Revoke every session of the current user, this one included.
    /// Signs out locally afterwards and returns the revocation count.
    pub async fn logout_all(&self) -> AuthResult<u32> {
        let backend = self.session.backend();
        let revoked = self
            .call(move |token| {
                let backend = Arc::clone(&backend);
                async move { backend.logout_all(&token).await }
            })
            .await?;

        // The current session is among the revoked; server-side
        // revocation inside logout() failing is expected here.
        let _ = self.session.logout().await;
        Ok(revoked)
    }

    /// Begin second-factor enrollment for the current user.
    pub async fn setup_second_factor(&self) -> AuthResult<SecondFactorSetup> {
        let backend = self.session.backend();
        self.call(move |token| {
            let backend = Arc::clone(&backend);
            async move { backend.setup_second_factor(&token).await }
        })
        .await
    }

    /// Confirm second-factor enrollment with an authenticator code.
    pub async fn verify_second_factor_setup(&self, code: &str) -> AuthResult<()> {
        let backend = self.session.backend();
        let code = code.to_string();
        self.call(move |token| {
            let backend = Arc::clone(&backend);
            let code = code.clone();
            async move { backend.verify_second_factor_setup(&token, &code).await }
        })
        .await
    }

    /// Disable the second factor. Requires the password and a current
    /// code or backup code.
    pub async fn disable_second_factor(&self, password: &str, code: &str) -> AuthResult<()> {
        let backend = self.session.backend();
        let password = password.to_string();
        let code = code.to_string();
        self.call(move |token| {
            let backend = Arc::clone(&backend);
            let password = password.clone();
            let code = code.clone();
            async move { backend.disable_second_factor(&token, &password, &code).await }
        })
        .await
    }
}
