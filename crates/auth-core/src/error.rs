//! Authentication error types.

use thiserror::Error;

/// Authentication error type.
#[derive(Error, Debug)]
pub enum AuthError {
    /// Wrong email or password. Recoverable: the user retries.
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    /// Wrong or expired second-factor code. Recoverable: the user
    /// retries while the provisional credential is still valid.
    #[error("Invalid second-factor code: {0}")]
    SecondFactorInvalid(String),

    /// Refresh token rejected or already used. Unrecoverable: forces
    /// sign-out, no retry.
    #[error("Refresh token rejected: {0}")]
    RefreshInvalid(String),

    /// Access token rejected even after a refresh retry. Unrecoverable:
    /// forces sign-out.
    #[error("Unauthorized")]
    Unauthorized,

    /// A single authorization failure, before the retry decision has
    /// been made. Backend implementations raise this on HTTP 401; the
    /// boundary adapter turns the second occurrence into `Unauthorized`.
    #[error("Access token rejected: {0}")]
    TokenRejected(String),

    /// No session is active for the requested operation.
    #[error("Not authenticated")]
    NotAuthenticated,

    /// Invalid transition in the auth state machine.
    #[error("Invalid auth state transition: {0}")]
    InvalidStateTransition(String),

    /// Unexpected backend response (non-auth status, malformed body).
    #[error("Backend error: {0}")]
    Backend(String),

    /// Credential storage error
    #[error("Storage error: {0}")]
    Store(#[from] credential_store::StoreError),

    /// HTTP transport error. Surfaced to the caller with no state
    /// mutation and no automatic retry beyond the boundary adapter's.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parse error
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl AuthError {
    /// True when the caller can simply retry with corrected input and
    /// no session state has been lost.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AuthError::InvalidCredentials(_) | AuthError::SecondFactorInvalid(_)
        )
    }

    /// True for the errors that force a local sign-out before they are
    /// surfaced.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AuthError::RefreshInvalid(_) | AuthError::Unauthorized
        )
    }
}

/// Result type alias using AuthError.
pub type AuthResult<T> = Result<T, AuthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_errors() {
        assert!(AuthError::InvalidCredentials("wrong password".into()).is_recoverable());
        assert!(AuthError::SecondFactorInvalid("expired code".into()).is_recoverable());
        assert!(!AuthError::RefreshInvalid("reused".into()).is_recoverable());
        assert!(!AuthError::Unauthorized.is_recoverable());
        assert!(!AuthError::NotAuthenticated.is_recoverable());
    }

    #[test]
    fn test_fatal_errors() {
        assert!(AuthError::RefreshInvalid("reused".into()).is_fatal());
        assert!(AuthError::Unauthorized.is_fatal());
        assert!(!AuthError::InvalidCredentials("nope".into()).is_fatal());
        assert!(!AuthError::TokenRejected("first 401".into()).is_fatal());
        assert!(!AuthError::Backend("http 500".into()).is_fatal());
    }
}
