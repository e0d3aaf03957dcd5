//! Authentication and authorization core for the admin console.
//!
//! This crate provides:
//! - An explicit FSM for the login journey, including the optional
//!   second-factor challenge
//! - Token lifecycle management with single-flight refresh and rotation
//! - Role/permission evaluation as pure functions over the identity
//! - Silent re-authentication on startup from stored credentials
//! - A boundary adapter that attaches credentials to privileged calls
//!   and retries exactly once after a refresh
//!
//! It performs no routing, rendering, or persistence of its own; the
//! backend is consumed through the [`AuthBackend`] trait and credentials
//! live in the `credential-store` crate.

mod backend;
mod error;
mod fsm;
mod gateway;
mod identity;
mod permissions;
mod session;

#[cfg(test)]
mod test_support;

pub use backend::{
    AuthBackend, HttpBackend, LoginReply, SecondFactorSetup, TokenGrant,
};
pub use error::{AuthError, AuthResult};
pub use fsm::auth_machine;
pub use fsm::{AuthMachine, AuthMachineInput, AuthMachineState, AuthState, AuthStateChange};
pub use gateway::{CallContext, Gateway};
pub use identity::{Identity, Permission, Role};
pub use session::{AuthStateCallback, LoginFlow, SessionManager};

pub use credential_store::{
    CredentialPair, CredentialStore, Medium, SessionMeta, StoredSession,
};
