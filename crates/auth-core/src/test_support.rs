//! Shared mock backend for session and gateway tests.

use crate::backend::{AuthBackend, LoginReply, SecondFactorSetup, TokenGrant};
use crate::error::{AuthError, AuthResult};
use crate::identity::Identity;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

pub const VALID_PASSWORD: &str = "correct horse";
pub const VALID_CODE: &str = "123456";
pub const PROVISIONAL_TOKEN: &str = "prov-1";

pub fn test_identity(two_factor: bool) -> Identity {
    Identity {
        id: Uuid::new_v4(),
        email: "ada@example.com".to_string(),
        username: None,
        first_name: "Ada".to_string(),
        last_name: "Lovelace".to_string(),
        phone_number: None,
        timezone: "UTC".to_string(),
        language: "en".to_string(),
        is_active: true,
        is_verified: true,
        is_superuser: false,
        is_two_factor_enabled: two_factor,
        roles: vec![],
    }
}

/// In-memory [`AuthBackend`] with rotating refresh tokens.
///
/// Each grant is numbered ("access-1"/"refresh-1", ...). A refresh
/// exchange invalidates the presented refresh token, so replaying an
/// old one fails with `RefreshInvalid`, matching server-side rotation.
pub struct MockBackend {
    identity: Identity,
    second_factor_enabled: bool,
    grant_counter: AtomicUsize,
    valid_refresh_tokens: Mutex<HashSet<String>>,
    /// Lifetime handed out with each grant, seconds.
    pub expires_in: AtomicI64,
    /// Artificial latency inside `refresh`, for interleaving tests.
    pub refresh_delay_ms: AtomicI64,
    /// Artificial latency inside `login` and `verify_second_factor`.
    pub submit_delay_ms: AtomicI64,
    /// When set, `refresh` fails with a transport-style error.
    pub refresh_network_failure: AtomicBool,
    /// `who_am_i` fails with `TokenRejected` this many times before
    /// succeeding.
    pub reject_who_am_i_times: AtomicUsize,
    pub login_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    pub who_am_i_calls: AtomicUsize,
    pub logout_calls: AtomicUsize,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::with_identity(test_identity(false))
    }

    pub fn with_second_factor() -> Self {
        let mut backend = Self::with_identity(test_identity(true));
        backend.second_factor_enabled = true;
        backend
    }

    /// Backend that authenticates the given identity (with the usual
    /// test password).
    pub fn for_identity(identity: Identity) -> Self {
        Self::with_identity(identity)
    }

    fn with_identity(identity: Identity) -> Self {
        Self {
            identity,
            second_factor_enabled: false,
            grant_counter: AtomicUsize::new(0),
            valid_refresh_tokens: Mutex::new(HashSet::new()),
            expires_in: AtomicI64::new(3600),
            refresh_delay_ms: AtomicI64::new(0),
            submit_delay_ms: AtomicI64::new(0),
            refresh_network_failure: AtomicBool::new(false),
            reject_who_am_i_times: AtomicUsize::new(0),
            login_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            who_am_i_calls: AtomicUsize::new(0),
            logout_calls: AtomicUsize::new(0),
        }
    }

    fn issue_grant(&self) -> TokenGrant {
        let n = self.grant_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let grant = TokenGrant {
            access_token: format!("access-{}", n),
            refresh_token: format!("refresh-{}", n),
            expires_in: self.expires_in.load(Ordering::SeqCst),
        };
        self.valid_refresh_tokens
            .lock()
            .unwrap()
            .insert(grant.refresh_token.clone());
        grant
    }

    /// Seed a grant as if a login had happened out of band. Used by
    /// bootstrap tests to pre-populate the credential store.
    pub fn seed_grant(&self) -> TokenGrant {
        self.issue_grant()
    }

    /// Invalidate every outstanding refresh token, as a server-side
    /// revocation would.
    pub fn revoke_all(&self) {
        self.valid_refresh_tokens.lock().unwrap().clear();
    }

    async fn submit_delay(&self) {
        let delay = self.submit_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }
    }
}

#[async_trait]
impl AuthBackend for MockBackend {
    async fn login(&self, email: &str, password: &str, _remember: bool) -> AuthResult<LoginReply> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        self.submit_delay().await;

        if email != self.identity.email || password != VALID_PASSWORD {
            return Err(AuthError::InvalidCredentials("bad email or password".into()));
        }

        if self.second_factor_enabled {
            return Ok(LoginReply::SecondFactorRequired {
                identity: self.identity.clone(),
                provisional_token: PROVISIONAL_TOKEN.to_string(),
            });
        }

        Ok(LoginReply::Complete {
            identity: self.identity.clone(),
            grant: self.issue_grant(),
        })
    }

    async fn verify_second_factor(
        &self,
        code: &str,
        provisional_token: &str,
    ) -> AuthResult<LoginReply> {
        self.submit_delay().await;
        if provisional_token != PROVISIONAL_TOKEN {
            return Err(AuthError::SecondFactorInvalid("challenge expired".into()));
        }
        if code != VALID_CODE {
            return Err(AuthError::SecondFactorInvalid("wrong code".into()));
        }
        Ok(LoginReply::Complete {
            identity: self.identity.clone(),
            grant: self.issue_grant(),
        })
    }

    async fn refresh(&self, refresh_token: &str) -> AuthResult<TokenGrant> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);

        let delay = self.refresh_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }

        if self.refresh_network_failure.load(Ordering::SeqCst) {
            return Err(AuthError::Backend("connection reset".into()));
        }

        let mut valid = self.valid_refresh_tokens.lock().unwrap();
        if !valid.remove(refresh_token) {
            return Err(AuthError::RefreshInvalid("unknown or reused token".into()));
        }
        drop(valid);

        Ok(self.issue_grant())
    }

    async fn logout(&self, refresh_token: &str) -> AuthResult<()> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        self.valid_refresh_tokens.lock().unwrap().remove(refresh_token);
        Ok(())
    }

    async fn logout_all(&self, _access_token: &str) -> AuthResult<u32> {
        let mut valid = self.valid_refresh_tokens.lock().unwrap();
        let revoked = valid.len() as u32;
        valid.clear();
        Ok(revoked)
    }

    async fn who_am_i(&self, _access_token: &str) -> AuthResult<Identity> {
        self.who_am_i_calls.fetch_add(1, Ordering::SeqCst);

        let remaining = self.reject_who_am_i_times.load(Ordering::SeqCst);
        if remaining > 0 {
            self.reject_who_am_i_times.store(remaining - 1, Ordering::SeqCst);
            return Err(AuthError::TokenRejected("token expired".into()));
        }

        Ok(self.identity.clone())
    }

    async fn change_password(
        &self,
        _access_token: &str,
        current_password: &str,
        _new_password: &str,
    ) -> AuthResult<()> {
        if current_password != VALID_PASSWORD {
            return Err(AuthError::InvalidCredentials("wrong current password".into()));
        }
        Ok(())
    }

    async fn setup_second_factor(&self, _access_token: &str) -> AuthResult<SecondFactorSetup> {
        Ok(SecondFactorSetup {
            secret: "JBSWY3DPEHPK3PXP".to_string(),
            qr_code: "data:image/png;base64,".to_string(),
            backup_codes: vec!["A1B2C3D4".to_string(), "E5F60718".to_string()],
        })
    }

    async fn verify_second_factor_setup(&self, _access_token: &str, code: &str) -> AuthResult<()> {
        if code != VALID_CODE {
            return Err(AuthError::SecondFactorInvalid("wrong code".into()));
        }
        Ok(())
    }

    async fn disable_second_factor(
        &self,
        _access_token: &str,
        password: &str,
        code: &str,
    ) -> AuthResult<()> {
        if password != VALID_PASSWORD {
            return Err(AuthError::InvalidCredentials("wrong password".into()));
        }
        if code != VALID_CODE {
            return Err(AuthError::SecondFactorInvalid("wrong code".into()));
        }
        Ok(())
    }
}
