//! Authentication state machine using rust-fsm.
//!
//! The FSM tracks state tags explicitly rather than deriving them from
//! storage checks. Payload data (tokens, the identity snapshot, the
//! provisional second-factor credential) lives in the session manager
//! and credential store, never in the machine itself.
//!
//! ## State Diagram
//!
//! ```text
//! ┌──────────────┐ CredentialsSubmitted ┌────────────────────────┐
//! │  SignedOut   │ ───────────────────► │ SubmittingCredentials  │
//! └──────┬───────┘                      └───────────┬────────────┘
//!        │ BootstrapStarted        LoginSucceeded │ │ SecondFactorRequired
//!        ▼                                        │ ▼
//! ┌──────────────┐ StoredCredentialFound          │ ┌─────────────────────┐
//! │  Validating  │──────────────────────┐         │ │ AwaitingSecondFactor│
//! └──────┬───────┘                      ▼         │ └──────────┬──────────┘
//!        │ StoredCredentialExpired ┌──────────────┴──┐         │ CodeSubmitted
//!        ▼                         │CheckingWithServer│        ▼
//! ┌──────────────┐  ServerAccepted └──────────┬──────┘ ┌─────────────────────┐
//! │  Refreshing  │◄──────────┐                │        │VerifyingSecondFactor│
//! └──────┬───────┘           │  TokenExpired  ▼        └──────────┬──────────┘
//!        │ RefreshSucceeded  └─────── ┌───────────────┐  CodeAccepted
//!        └──────────────────────────► │ Authenticated │◄──────────┘
//!                                     └───────┬───────┘
//!                                             │ LogoutRequested
//!                                             ▼
//!                                      SigningOut ──► SignedOut
//! ```

use rust_fsm::*;
use serde::{Deserialize, Serialize};

// Generates the `auth_machine` module with State, Input, StateMachine
// and the transition impl.
state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub auth_machine(SignedOut)

    SignedOut => {
        CredentialsSubmitted => SubmittingCredentials,
        BootstrapStarted => Validating
    },
    SubmittingCredentials => {
        LoginSucceeded => Authenticated,
        // Identity has a second factor enabled; a provisional credential
        // scopes the challenge, nothing more.
        SecondFactorRequired => AwaitingSecondFactor,
        LoginRejected => SignedOut
    },
    AwaitingSecondFactor => {
        CodeSubmitted => VerifyingSecondFactor,
        // Navigating away discards the pending challenge.
        ChallengeCancelled => SignedOut
    },
    VerifyingSecondFactor => {
        CodeAccepted => Authenticated,
        // Wrong or expired code: the challenge stays open for retry.
        CodeRejected => AwaitingSecondFactor
    },
    Validating => {
        // Stored access token still inside its expiry: verify with server
        StoredCredentialFound => CheckingWithServer,
        // Stored access token expired locally: refresh first
        StoredCredentialExpired => Refreshing,
        NoStoredCredential => SignedOut
    },
    CheckingWithServer => {
        ServerAccepted => Authenticated,
        ServerRejected => SignedOut
    },
    Authenticated => {
        TokenExpired => Refreshing,
        LogoutRequested => SigningOut,
        // Fatal credential failure observed outside a refresh exchange
        SessionInvalidated => SignedOut
    },
    Refreshing => {
        RefreshSucceeded => Authenticated,
        // Transport failure: credentials untouched, caller retries later
        RefreshInterrupted => Authenticated,
        // Refresh token rejected or reused: forced sign-out
        RefreshRejected => SignedOut
    },
    SigningOut => {
        LogoutCompleted => SignedOut
    }
}

// Re-export the generated types with clearer names
pub use auth_machine::Input as AuthMachineInput;
pub use auth_machine::State as AuthMachineState;
pub use auth_machine::StateMachine as AuthMachine;

/// Simplified view of the machine state for consumers (route guards,
/// conditional rendering, IPC).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthState {
    /// No session; the login form is the only way forward.
    SignedOut,
    /// Email/password submission in flight.
    SubmittingCredentials,
    /// Login accepted but a second-factor code is required. Grants
    /// nothing until the code is verified.
    AwaitingSecondFactor,
    /// Second-factor code submission in flight.
    VerifyingSecondFactor,
    /// Startup check of stored credentials.
    Validating,
    /// Stored credentials being verified with the backend.
    CheckingWithServer,
    /// Signed in with a live session.
    Authenticated,
    /// Access token expired; a refresh exchange is in flight.
    Refreshing,
    /// Logout in progress (server revocation is best-effort).
    SigningOut,
}

impl AuthState {
    /// True only for a live, fully established session.
    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthState::Authenticated)
    }

    /// True while permission-gated operations may proceed. `Refreshing`
    /// still counts: the session is live, only the token is being
    /// rotated.
    pub fn grants_access(&self) -> bool {
        matches!(self, AuthState::Authenticated | AuthState::Refreshing)
    }

    /// True for in-progress states between two stable ones.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AuthState::SubmittingCredentials
                | AuthState::VerifyingSecondFactor
                | AuthState::Validating
                | AuthState::CheckingWithServer
                | AuthState::Refreshing
                | AuthState::SigningOut
        )
    }
}

impl From<&AuthMachineState> for AuthState {
    fn from(state: &AuthMachineState) -> Self {
        match state {
            AuthMachineState::SignedOut => AuthState::SignedOut,
            AuthMachineState::SubmittingCredentials => AuthState::SubmittingCredentials,
            AuthMachineState::AwaitingSecondFactor => AuthState::AwaitingSecondFactor,
            AuthMachineState::VerifyingSecondFactor => AuthState::VerifyingSecondFactor,
            AuthMachineState::Validating => AuthState::Validating,
            AuthMachineState::CheckingWithServer => AuthState::CheckingWithServer,
            AuthMachineState::Authenticated => AuthState::Authenticated,
            AuthMachineState::Refreshing => AuthState::Refreshing,
            AuthMachineState::SigningOut => AuthState::SigningOut,
        }
    }
}

/// Payload for auth state change notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthStateChange {
    /// Current auth state.
    pub state: AuthState,
    /// User ID if a session exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// User email if available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}
