//! Session management with FSM-based state tracking and single-flight
//! token refresh.
//!
//! The FSM tracks the login journey explicitly rather than deriving it
//! from storage checks. Session data (tokens, metadata) lives in the
//! credential store; the identity snapshot is held in memory and
//! re-fetched on startup.

use crate::backend::{AuthBackend, LoginReply, TokenGrant};
use crate::error::{AuthError, AuthResult};
use crate::fsm::{AuthMachine, AuthMachineInput, AuthMachineState, AuthState, AuthStateChange};
use crate::gateway::Gateway;
use crate::identity::Identity;
use chrono::{Duration, Utc};
use credential_store::{CredentialPair, CredentialStore, Medium, SessionMeta};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info, warn};

/// Callback type for auth state change notifications.
pub type AuthStateCallback = Box<dyn Fn(AuthStateChange) + Send + Sync>;

/// Outcome of a credential submission, as seen by the caller driving
/// the login form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginFlow {
    /// Session established; the caller can proceed.
    Complete,
    /// A second-factor code must be submitted before any session exists.
    SecondFactorRequired,
}

/// A login held open while the second-factor challenge is answered.
struct PendingSecondFactor {
    provisional_token: String,
    remember: bool,
}

/// An in-flight submission holding the machine in a transient state.
///
/// Login and second-factor futures can be dropped by navigation away
/// from the form. Dropping this guard before [`settle`] restores the
/// pre-submission state, so an abandoned submission commits nothing and
/// the machine stays usable.
///
/// [`settle`]: TransientOp::settle
struct TransientOp<'a> {
    manager: &'a SessionManager,
    prior: Option<AuthMachineState>,
}

impl TransientOp<'_> {
    /// Resolve the operation with its outcome transition. Consumes the
    /// guard; the revert no longer applies.
    fn settle(mut self, input: &AuthMachineInput) -> AuthResult<AuthState> {
        self.prior = None;
        self.manager.transition(input)
    }
}

impl Drop for TransientOp<'_> {
    fn drop(&mut self) {
        if let Some(prior) = self.prior.take() {
            self.manager.restore_state(prior);
        }
    }
}

/// Session manager for authentication state.
///
/// All privileged callers funnel through [`access_token`] /
/// [`Gateway`], which guarantees the refresh exchange runs at most once
/// per expiry regardless of how many tasks hit it concurrently.
///
/// [`access_token`]: SessionManager::access_token
pub struct SessionManager {
    store: CredentialStore,
    backend: Arc<dyn AuthBackend>,
    /// Internal FSM for tracking auth state transitions.
    fsm: Mutex<AuthMachine>,
    /// Identity snapshot from login or who-am-i. Not persisted.
    identity: RwLock<Option<Identity>>,
    /// Open second-factor challenge, if any.
    pending_second_factor: Mutex<Option<PendingSecondFactor>>,
    /// Serializes refresh exchanges. Concurrent callers queue here and
    /// re-check the stored pair after acquisition.
    refresh_gate: tokio::sync::Mutex<()>,
    /// Recorded bootstrap result; a completed bootstrap never reruns.
    bootstrap_outcome: tokio::sync::Mutex<Option<bool>>,
    /// Optional callback for state change notifications.
    state_callback: Mutex<Option<AuthStateCallback>>,
}

impl SessionManager {
    /// Create a session manager over the given store and backend.
    pub fn new(store: CredentialStore, backend: Arc<dyn AuthBackend>) -> Self {
        Self {
            store,
            backend,
            fsm: Mutex::new(AuthMachine::new()),
            identity: RwLock::new(None),
            pending_second_factor: Mutex::new(None),
            refresh_gate: tokio::sync::Mutex::new(()),
            bootstrap_outcome: tokio::sync::Mutex::new(None),
            state_callback: Mutex::new(None),
        }
    }

    /// Session manager with both credential mediums in memory. Useful
    /// for tests and ephemeral embeds.
    pub fn in_memory(backend: Arc<dyn AuthBackend>) -> Self {
        Self::new(CredentialStore::in_memory(), backend)
    }

    /// Set a callback to be notified of auth state changes.
    ///
    /// Useful for broadcasting state to the UI layer over IPC.
    pub fn set_state_callback(&self, callback: AuthStateCallback) {
        let mut cb = self.state_callback.lock().unwrap();
        *cb = Some(callback);
    }

    /// Current auth state.
    pub fn state(&self) -> AuthState {
        let fsm = self.fsm.lock().unwrap();
        AuthState::from(fsm.state())
    }

    /// True only for a fully established session.
    pub fn is_authenticated(&self) -> bool {
        self.state().is_authenticated()
    }

    /// Snapshot of the authenticated identity, if any.
    pub fn current_identity(&self) -> Option<Identity> {
        self.identity.read().unwrap().clone()
    }

    pub(crate) fn backend(&self) -> Arc<dyn AuthBackend> {
        Arc::clone(&self.backend)
    }

    /// Transition the FSM and notify the callback if the state changed.
    fn transition(&self, input: &AuthMachineInput) -> AuthResult<AuthState> {
        let mut fsm = self.fsm.lock().unwrap();
        let old_state = AuthState::from(fsm.state());

        fsm.consume(input).map_err(|_| {
            AuthError::InvalidStateTransition(format!(
                "Cannot apply {:?} in state {:?}",
                input,
                fsm.state()
            ))
        })?;

        let new_state = AuthState::from(fsm.state());
        drop(fsm);

        if old_state != new_state {
            debug!(
                old_state = ?old_state,
                new_state = ?new_state,
                "Auth state transition"
            );
            self.notify_state_change(&new_state);
        }

        Ok(new_state)
    }

    /// Enter a transient state, returning a guard that reverts to the
    /// current state if the operation is dropped before it settles.
    fn begin_transient(&self, input: &AuthMachineInput) -> AuthResult<TransientOp<'_>> {
        let prior = self.fsm.lock().unwrap().state().clone();
        self.transition(input)?;
        Ok(TransientOp {
            manager: self,
            prior: Some(prior),
        })
    }

    /// Put the machine back into `prior`, bypassing the transition
    /// table. Only reachable from a dropped [`TransientOp`].
    fn restore_state(&self, prior: AuthMachineState) {
        let mut fsm = self.fsm.lock().unwrap();
        let abandoned = AuthState::from(fsm.state());
        let restored = AuthState::from(&prior);
        *fsm = AuthMachine::from_state(prior);
        drop(fsm);

        if abandoned != restored {
            debug!(
                abandoned = ?abandoned,
                restored = ?restored,
                "Submission dropped mid-flight, state restored"
            );
            self.notify_state_change(&restored);
        }
    }

    fn notify_state_change(&self, state: &AuthState) {
        let cb = self.state_callback.lock().unwrap();
        if let Some(callback) = cb.as_ref() {
            let (user_id, email) = self
                .store
                .load()
                .ok()
                .flatten()
                .map(|s| (Some(s.meta.user_id), s.meta.email))
                .unwrap_or((None, None));

            callback(AuthStateChange {
                state: state.clone(),
                user_id,
                email,
            });
        }
    }

    fn pair_from_grant(grant: &TokenGrant) -> CredentialPair {
        CredentialPair {
            access_token: grant.access_token.clone(),
            refresh_token: grant.refresh_token.clone(),
            expires_at: Utc::now() + Duration::seconds(grant.expires_in),
        }
    }

    fn install_session(
        &self,
        identity: Identity,
        grant: &TokenGrant,
        medium: Medium,
    ) -> AuthResult<()> {
        let pair = Self::pair_from_grant(grant);
        let meta = SessionMeta {
            user_id: identity.id.to_string(),
            email: Some(identity.email.clone()),
        };
        self.store.store(&pair, &meta, medium)?;
        *self.identity.write().unwrap() = Some(identity);
        Ok(())
    }

    fn clear_local_session(&self) -> AuthResult<()> {
        self.store.clear()?;
        *self.identity.write().unwrap() = None;
        *self.pending_second_factor.lock().unwrap() = None;
        Ok(())
    }

    /// Submit email/password credentials.
    ///
    /// On `LoginFlow::SecondFactorRequired` no session exists yet; the
    /// caller must follow up with [`verify_second_factor`] or
    /// [`cancel_second_factor`].
    ///
    /// [`verify_second_factor`]: SessionManager::verify_second_factor
    /// [`cancel_second_factor`]: SessionManager::cancel_second_factor
    pub async fn login(&self, email: &str, password: &str, remember: bool) -> AuthResult<LoginFlow> {
        let op = self.begin_transient(&AuthMachineInput::CredentialsSubmitted)?;

        // Dropping this future before the reply is processed drops `op`,
        // which puts the machine back to SignedOut with nothing committed.
        match self.backend.login(email, password, remember).await {
            Ok(LoginReply::Complete { identity, grant }) => {
                let medium = if remember {
                    Medium::Persistent
                } else {
                    Medium::Session
                };
                self.install_session(identity, &grant, medium)?;
                op.settle(&AuthMachineInput::LoginSucceeded)?;
                info!(remember, "Login complete");
                Ok(LoginFlow::Complete)
            }
            Ok(LoginReply::SecondFactorRequired {
                identity,
                provisional_token,
            }) => {
                let mut pending = self.pending_second_factor.lock().unwrap();
                *pending = Some(PendingSecondFactor {
                    provisional_token,
                    remember,
                });
                drop(pending);

                op.settle(&AuthMachineInput::SecondFactorRequired)?;
                info!(email = %identity.email, "Second-factor challenge issued");
                Ok(LoginFlow::SecondFactorRequired)
            }
            Err(err) => {
                let _ = op.settle(&AuthMachineInput::LoginRejected);
                Err(err)
            }
        }
    }

    /// Answer the pending second-factor challenge with a TOTP code or
    /// an 8-character backup code.
    ///
    /// A malformed code is rejected locally without a round trip or a
    /// state transition; the challenge stays open either way until the
    /// provisional credential expires.
    pub async fn verify_second_factor(&self, code: &str) -> AuthResult<()> {
        let code = code.trim();

        let (provisional_token, remember) = {
            let pending = self.pending_second_factor.lock().unwrap();
            match pending.as_ref() {
                Some(p) => (p.provisional_token.clone(), p.remember),
                None => {
                    return Err(AuthError::InvalidStateTransition(
                        "No second-factor challenge pending".to_string(),
                    ))
                }
            }
        };

        if !is_plausible_code(code) {
            return Err(AuthError::SecondFactorInvalid(
                "Code must be 6 digits or an 8-character backup code".to_string(),
            ));
        }

        let op = self.begin_transient(&AuthMachineInput::CodeSubmitted)?;

        // A drop mid-await reverts to AwaitingSecondFactor; the pending
        // credential is untouched so the challenge survives.
        match self
            .backend
            .verify_second_factor(code, &provisional_token)
            .await
        {
            Ok(LoginReply::Complete { identity, grant }) => {
                let medium = if remember {
                    Medium::Persistent
                } else {
                    Medium::Session
                };
                self.install_session(identity, &grant, medium)?;
                *self.pending_second_factor.lock().unwrap() = None;
                op.settle(&AuthMachineInput::CodeAccepted)?;
                info!("Second-factor challenge passed");
                Ok(())
            }
            Ok(LoginReply::SecondFactorRequired { .. }) => {
                let _ = op.settle(&AuthMachineInput::CodeRejected);
                Err(AuthError::Backend(
                    "Backend issued a second challenge mid-verification".to_string(),
                ))
            }
            Err(err) => {
                // Challenge stays open; the pending credential is kept
                // for the retry.
                let _ = op.settle(&AuthMachineInput::CodeRejected);
                Err(err)
            }
        }
    }

    /// Abandon the pending second-factor challenge.
    pub fn cancel_second_factor(&self) -> AuthResult<()> {
        self.transition(&AuthMachineInput::ChallengeCancelled)?;
        *self.pending_second_factor.lock().unwrap() = None;
        Ok(())
    }

    /// A valid access token, refreshing first when the stored one is
    /// within the expiry leeway.
    pub async fn access_token(&self) -> AuthResult<String> {
        let stored = self.store.load()?.ok_or(AuthError::NotAuthenticated)?;
        if !stored.pair.is_expired() {
            return Ok(stored.pair.access_token);
        }
        self.refresh().await
    }

    /// Exchange the refresh token for a new pair. Single-flight: a
    /// second caller arriving mid-exchange waits and receives the pair
    /// the first exchange produced.
    pub async fn refresh(&self) -> AuthResult<String> {
        self.refresh_inner(None).await
    }

    /// Refresh after a server-side rejection of `rejected_token`. Skips
    /// the exchange when the stored token already differs (a concurrent
    /// caller rotated it).
    pub(crate) async fn refresh_rejected(&self, rejected_token: &str) -> AuthResult<String> {
        self.refresh_inner(Some(rejected_token)).await
    }

    async fn refresh_inner(&self, rejected: Option<&str>) -> AuthResult<String> {
        let _gate = self.refresh_gate.lock().await;

        // Re-check under the gate: the exchange we queued behind may
        // have already produced a fresh pair.
        let stored = self.store.load()?.ok_or(AuthError::NotAuthenticated)?;
        let already_fresh = match rejected {
            Some(token) => stored.pair.access_token != token,
            None => !stored.pair.is_expired(),
        };
        if already_fresh {
            return Ok(stored.pair.access_token);
        }

        // Tolerated when the machine is already in Refreshing (the
        // bootstrap path arrives there via StoredCredentialExpired).
        let _ = self.transition(&AuthMachineInput::TokenExpired);

        match self.backend.refresh(&stored.pair.refresh_token).await {
            Ok(grant) => {
                let pair = Self::pair_from_grant(&grant);
                // Rotation: the old pair must never outlive the exchange.
                self.store.rotate(&pair)?;
                let _ = self.transition(&AuthMachineInput::RefreshSucceeded);
                debug!("Access token refreshed");
                Ok(pair.access_token)
            }
            Err(AuthError::RefreshInvalid(msg)) => {
                warn!("Refresh token rejected, clearing session");
                self.clear_local_session()?;
                let _ = self.transition(&AuthMachineInput::RefreshRejected);
                Err(AuthError::RefreshInvalid(msg))
            }
            Err(err) => {
                // Transport or server fault: the stored pair stays put
                // and the caller surfaces the error.
                let _ = self.transition(&AuthMachineInput::RefreshInterrupted);
                Err(err)
            }
        }
    }

    /// Sign out. Server-side revocation is best-effort; local state is
    /// cleared unconditionally.
    pub async fn logout(&self) -> AuthResult<()> {
        let _ = self.transition(&AuthMachineInput::LogoutRequested);

        let refresh_token = self.store.load()?.map(|s| s.pair.refresh_token);
        if let Some(token) = refresh_token {
            if let Err(err) = self.backend.logout(&token).await {
                debug!(error = %err, "Server-side logout failed, clearing locally anyway");
            }
        }

        self.clear_local_session()?;
        let _ = self.transition(&AuthMachineInput::LogoutCompleted);
        info!("Logged out");
        Ok(())
    }

    /// Restore a session from stored credentials on startup.
    ///
    /// The stored access token is never trusted blind: an unexpired one
    /// is verified with the server, an expired one goes through the
    /// refresh exchange first. Runs at most once per process; later
    /// calls return the recorded outcome.
    ///
    /// Returns `Ok(true)` when a session was restored, `Ok(false)` when
    /// no usable credentials exist, and an error when stored
    /// credentials were rejected (the session is cleared) or the server
    /// was unreachable (credentials kept for a later attempt).
    pub async fn bootstrap(self: &Arc<Self>) -> AuthResult<bool> {
        let mut outcome = self.bootstrap_outcome.lock().await;
        if let Some(done) = *outcome {
            return Ok(done);
        }

        self.transition(&AuthMachineInput::BootstrapStarted)?;

        let stored = match self.store.load()? {
            Some(s) => s,
            None => {
                info!("No stored session on startup");
                self.transition(&AuthMachineInput::NoStoredCredential)?;
                *outcome = Some(false);
                return Ok(false);
            }
        };

        if stored.pair.is_expired() {
            info!(user_id = %stored.meta.user_id, "Stored session expired, refreshing");
            self.transition(&AuthMachineInput::StoredCredentialExpired)?;

            let token = match self.refresh().await {
                Ok(t) => t,
                Err(err) => {
                    if err.is_fatal() {
                        // refresh() already cleared the session and
                        // drove the machine to SignedOut.
                        *outcome = Some(false);
                    } else {
                        // Transport fault: credentials stay for the
                        // next attempt, the machine returns to rest.
                        let _ = self.transition(&AuthMachineInput::SessionInvalidated);
                    }
                    warn!(error = %err, "Startup refresh failed");
                    return Err(err);
                }
            };

            match self.backend.who_am_i(&token).await {
                Ok(identity) => {
                    *self.identity.write().unwrap() = Some(identity);
                    *outcome = Some(true);
                    info!("Session restored after refresh");
                    Ok(true)
                }
                Err(AuthError::TokenRejected(_)) | Err(AuthError::Unauthorized) => {
                    self.clear_local_session()?;
                    let _ = self.transition(&AuthMachineInput::SessionInvalidated);
                    *outcome = Some(false);
                    Err(AuthError::Unauthorized)
                }
                Err(err) => {
                    let _ = self.transition(&AuthMachineInput::SessionInvalidated);
                    Err(err)
                }
            }
        } else {
            self.transition(&AuthMachineInput::StoredCredentialFound)?;

            // Through the gateway so a stale-but-unexpired token gets
            // one refresh-and-retry before the session is condemned.
            let gateway = Gateway::new(Arc::clone(self));
            match gateway.who_am_i().await {
                Ok(identity) => {
                    *self.identity.write().unwrap() = Some(identity);
                    self.transition(&AuthMachineInput::ServerAccepted)?;
                    *outcome = Some(true);
                    info!(user_id = %stored.meta.user_id, "Stored session verified");
                    Ok(true)
                }
                Err(err) => {
                    if err.is_fatal() {
                        // The gateway cleared local state on the
                        // terminal rejection.
                        *outcome = Some(false);
                    }
                    let _ = self.transition(&AuthMachineInput::ServerRejected);
                    warn!(error = %err, "Stored session verification failed");
                    Err(err)
                }
            }
        }
    }

    // -----------------------------------------------------------------
    // Authorization checks. All return false outside a live session,
    // whatever the identity snapshot says.

    pub fn has_permission(&self, name: &str) -> bool {
        self.with_live_identity(|i| i.has_permission(name))
    }

    pub fn has_role(&self, name: &str) -> bool {
        self.with_live_identity(|i| i.has_role(name))
    }

    pub fn has_any_permission<S: AsRef<str>>(&self, names: &[S]) -> bool {
        self.with_live_identity(|i| i.has_any_permission(names))
    }

    pub fn has_all_permissions<S: AsRef<str>>(&self, names: &[S]) -> bool {
        self.with_live_identity(|i| i.has_all_permissions(names))
    }

    fn with_live_identity(&self, check: impl FnOnce(&Identity) -> bool) -> bool {
        if !self.state().grants_access() {
            return false;
        }
        self.identity
            .read()
            .unwrap()
            .as_ref()
            .map(check)
            .unwrap_or(false)
    }
}

/// Shape check before the code leaves the process: 6 digits for a TOTP
/// code, 8 hex characters for a backup code.
fn is_plausible_code(code: &str) -> bool {
    (code.len() == 6 && code.chars().all(|c| c.is_ascii_digit()))
        || (code.len() == 8 && code.chars().all(|c| c.is_ascii_hexdigit()))
}
