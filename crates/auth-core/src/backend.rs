//! Backend abstraction and the HTTP implementation against the admin API.
//!
//! [`AuthBackend`] is the seam the session manager and boundary adapter
//! consume; tests substitute a mock, production wires [`HttpBackend`]
//! at `{base}/api/v1/auth/*`.
//!
//! Error mapping is the backend's job: each method translates the
//! endpoint's auth-failure statuses into the matching [`AuthError`]
//! variant so callers never inspect HTTP statuses themselves.

use crate::error::{AuthError, AuthResult};
use crate::identity::Identity;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

/// A freshly issued access/refresh token pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
}

/// Outcome of a credential or second-factor submission.
#[derive(Debug, Clone)]
pub enum LoginReply {
    /// Credentials fully verified; a session can be established.
    Complete {
        identity: Identity,
        grant: TokenGrant,
    },
    /// Password accepted but a second-factor code is required. The
    /// provisional token is only valid for the challenge endpoint and
    /// expires within minutes.
    SecondFactorRequired {
        identity: Identity,
        provisional_token: String,
    },
}

/// Enrollment material for setting up a time-based second factor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecondFactorSetup {
    /// Base32 TOTP secret for manual entry.
    pub secret: String,
    /// Data-URI QR code encoding the provisioning URI.
    pub qr_code: String,
    /// One-time backup codes, shown exactly once.
    pub backup_codes: Vec<String>,
}

/// The authentication backend as seen by the session manager.
///
/// Methods that act on an established session take the access token
/// explicitly; attaching it and retrying on rejection is the boundary
/// adapter's job, not the backend's.
#[async_trait]
pub trait AuthBackend: Send + Sync {
    /// Exchange email/password for a session or a second-factor challenge.
    async fn login(&self, email: &str, password: &str, remember: bool) -> AuthResult<LoginReply>;

    /// Complete a pending second-factor challenge.
    async fn verify_second_factor(
        &self,
        code: &str,
        provisional_token: &str,
    ) -> AuthResult<LoginReply>;

    /// Exchange a refresh token for a new grant. The old refresh token
    /// is invalidated server-side; replaying it yields `RefreshInvalid`.
    async fn refresh(&self, refresh_token: &str) -> AuthResult<TokenGrant>;

    /// Revoke the session holding this refresh token.
    async fn logout(&self, refresh_token: &str) -> AuthResult<()>;

    /// Revoke every session of the current user. Returns the count of
    /// sessions revoked.
    async fn logout_all(&self, access_token: &str) -> AuthResult<u32>;

    /// Fetch the identity behind an access token.
    async fn who_am_i(&self, access_token: &str) -> AuthResult<Identity>;

    /// Change the account password. Other sessions are revoked server-side.
    async fn change_password(
        &self,
        access_token: &str,
        current_password: &str,
        new_password: &str,
    ) -> AuthResult<()>;

    /// Begin second-factor enrollment.
    async fn setup_second_factor(&self, access_token: &str) -> AuthResult<SecondFactorSetup>;

    /// Confirm enrollment with a code from the authenticator app.
    async fn verify_second_factor_setup(&self, access_token: &str, code: &str) -> AuthResult<()>;

    /// Disable the second factor. Requires the password and a current
    /// code (or backup code).
    async fn disable_second_factor(
        &self,
        access_token: &str,
        password: &str,
        code: &str,
    ) -> AuthResult<()>;
}

// ---------------------------------------------------------------------------
// Wire types

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
    remember_me: bool,
}

#[derive(Debug, Serialize)]
struct SecondFactorRequest<'a> {
    code: &'a str,
}

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Debug, Serialize)]
struct ChangePasswordRequest<'a> {
    current_password: &'a str,
    new_password: &'a str,
}

#[derive(Debug, Serialize)]
struct DisableSecondFactorRequest<'a> {
    password: &'a str,
    code: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenBody {
    access_token: String,
    #[serde(default)]
    refresh_token: String,
    expires_in: i64,
}

/// Login and challenge endpoints share this response shape. A pending
/// second-factor challenge is signalled by a message plus an empty
/// refresh token; the access token then carries the provisional
/// challenge credential.
#[derive(Debug, Deserialize)]
struct LoginResponse {
    user: Identity,
    token: TokenBody,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LogoutAllResponse {
    sessions_revoked: u32,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    detail: Option<String>,
}

impl LoginResponse {
    fn into_reply(self) -> LoginReply {
        if self.message.is_some() && self.token.refresh_token.is_empty() {
            LoginReply::SecondFactorRequired {
                identity: self.user,
                provisional_token: self.token.access_token,
            }
        } else {
            LoginReply::Complete {
                identity: self.user,
                grant: TokenGrant {
                    access_token: self.token.access_token,
                    refresh_token: self.token.refresh_token,
                    expires_in: self.token.expires_in,
                },
            }
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP implementation

/// [`AuthBackend`] over the admin API's REST endpoints.
#[derive(Clone)]
pub struct HttpBackend {
    http_client: reqwest::Client,
    base_url: Url,
}

impl HttpBackend {
    /// Create a backend for the given API base URL (e.g.
    /// `https://admin.example.com`). Fails on an unparseable URL.
    pub fn new(base_url: &str) -> AuthResult<Self> {
        let base_url = Url::parse(base_url)?;
        Ok(Self {
            http_client: reqwest::Client::new(),
            base_url,
        })
    }

    /// Build the URL for an auth endpoint.
    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/api/v1/auth/{}",
            self.base_url.as_str().trim_end_matches('/'),
            path
        )
    }

    fn bearer(token: &str) -> String {
        format!("Bearer {}", token)
    }

    /// Extract the error detail from a failed response, falling back to
    /// the status line.
    async fn error_detail(response: reqwest::Response) -> String {
        let status = response.status();
        let detail = response
            .json::<ErrorBody>()
            .await
            .ok()
            .and_then(|body| body.detail);
        detail.unwrap_or_else(|| status.to_string())
    }
}

#[async_trait]
impl AuthBackend for HttpBackend {
    async fn login(&self, email: &str, password: &str, remember: bool) -> AuthResult<LoginReply> {
        let url = self.endpoint("login");
        tracing::debug!(%email, remember, "Submitting credentials");

        let response = self
            .http_client
            .post(&url)
            .json(&LoginRequest {
                email,
                password,
                remember_me: remember,
            })
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            let body: LoginResponse = response.json().await?;
            return Ok(body.into_reply());
        }

        let detail = Self::error_detail(response).await;
        // 401: wrong credentials, 403: unverified/inactive account,
        // 423: account locked. All surface as a login failure.
        match status.as_u16() {
            401 | 403 | 423 => Err(AuthError::InvalidCredentials(detail)),
            _ => Err(AuthError::Backend(format!("login failed: {}", detail))),
        }
    }

    async fn verify_second_factor(
        &self,
        code: &str,
        provisional_token: &str,
    ) -> AuthResult<LoginReply> {
        let url = self.endpoint("login/2fa");
        tracing::debug!("Submitting second-factor code");

        let response = self
            .http_client
            .post(&url)
            .header("Authorization", Self::bearer(provisional_token))
            .json(&SecondFactorRequest { code })
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            let body: LoginResponse = response.json().await?;
            return Ok(body.into_reply());
        }

        let detail = Self::error_detail(response).await;
        match status.as_u16() {
            400 | 401 => Err(AuthError::SecondFactorInvalid(detail)),
            _ => Err(AuthError::Backend(format!(
                "second-factor verification failed: {}",
                detail
            ))),
        }
    }

    async fn refresh(&self, refresh_token: &str) -> AuthResult<TokenGrant> {
        let url = self.endpoint("refresh");
        tracing::debug!("Exchanging refresh token");

        let response = self
            .http_client
            .post(&url)
            .json(&RefreshRequest { refresh_token })
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            let body: TokenBody = response.json().await?;
            return Ok(TokenGrant {
                access_token: body.access_token,
                refresh_token: body.refresh_token,
                expires_in: body.expires_in,
            });
        }

        let detail = Self::error_detail(response).await;
        match status.as_u16() {
            400 | 401 | 403 => Err(AuthError::RefreshInvalid(detail)),
            _ => Err(AuthError::Backend(format!("refresh failed: {}", detail))),
        }
    }

    async fn logout(&self, refresh_token: &str) -> AuthResult<()> {
        let url = self.endpoint("logout");

        let response = self
            .http_client
            .post(&url)
            .json(&RefreshRequest { refresh_token })
            .send()
            .await?;

        if !response.status().is_success() {
            let detail = Self::error_detail(response).await;
            return Err(AuthError::Backend(format!("logout failed: {}", detail)));
        }
        Ok(())
    }

    async fn logout_all(&self, access_token: &str) -> AuthResult<u32> {
        let url = self.endpoint("logout-all");

        let response = self
            .http_client
            .post(&url)
            .header("Authorization", Self::bearer(access_token))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            let body: LogoutAllResponse = response.json().await?;
            return Ok(body.sessions_revoked);
        }

        let detail = Self::error_detail(response).await;
        match status.as_u16() {
            401 => Err(AuthError::TokenRejected(detail)),
            _ => Err(AuthError::Backend(format!("logout-all failed: {}", detail))),
        }
    }

    async fn who_am_i(&self, access_token: &str) -> AuthResult<Identity> {
        let url = self.endpoint("me");

        let response = self
            .http_client
            .get(&url)
            .header("Authorization", Self::bearer(access_token))
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            let identity: Identity = response.json().await?;
            return Ok(identity);
        }

        let detail = Self::error_detail(response).await;
        match status.as_u16() {
            401 => Err(AuthError::TokenRejected(detail)),
            _ => Err(AuthError::Backend(format!("who-am-i failed: {}", detail))),
        }
    }

    async fn change_password(
        &self,
        access_token: &str,
        current_password: &str,
        new_password: &str,
    ) -> AuthResult<()> {
        let url = self.endpoint("change-password");

        let response = self
            .http_client
            .post(&url)
            .header("Authorization", Self::bearer(access_token))
            .json(&ChangePasswordRequest {
                current_password,
                new_password,
            })
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let detail = Self::error_detail(response).await;
        match status.as_u16() {
            // Wrong current password
            400 | 422 => Err(AuthError::InvalidCredentials(detail)),
            401 => Err(AuthError::TokenRejected(detail)),
            _ => Err(AuthError::Backend(format!(
                "change-password failed: {}",
                detail
            ))),
        }
    }

    async fn setup_second_factor(&self, access_token: &str) -> AuthResult<SecondFactorSetup> {
        let url = self.endpoint("2fa/setup");

        let response = self
            .http_client
            .post(&url)
            .header("Authorization", Self::bearer(access_token))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            let setup: SecondFactorSetup = response.json().await?;
            return Ok(setup);
        }

        let detail = Self::error_detail(response).await;
        match status.as_u16() {
            401 => Err(AuthError::TokenRejected(detail)),
            _ => Err(AuthError::Backend(format!("2fa setup failed: {}", detail))),
        }
    }

    async fn verify_second_factor_setup(&self, access_token: &str, code: &str) -> AuthResult<()> {
        let url = self.endpoint("2fa/verify");

        let response = self
            .http_client
            .post(&url)
            .header("Authorization", Self::bearer(access_token))
            .json(&SecondFactorRequest { code })
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let detail = Self::error_detail(response).await;
        match status.as_u16() {
            400 => Err(AuthError::SecondFactorInvalid(detail)),
            401 => Err(AuthError::TokenRejected(detail)),
            _ => Err(AuthError::Backend(format!(
                "2fa verification failed: {}",
                detail
            ))),
        }
    }

    async fn disable_second_factor(
        &self,
        access_token: &str,
        password: &str,
        code: &str,
    ) -> AuthResult<()> {
        let url = self.endpoint("2fa/disable");

        let response = self
            .http_client
            .post(&url)
            .header("Authorization", Self::bearer(access_token))
            .json(&DisableSecondFactorRequest { password, code })
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let detail = Self::error_detail(response).await;
        match status.as_u16() {
            400 => Err(AuthError::SecondFactorInvalid(detail)),
            401 => Err(AuthError::TokenRejected(detail)),
            _ => Err(AuthError::Backend(format!(
                "2fa disable failed: {}",
                detail
            ))),
        }
    }
}
