//! Client-side credential persistence for the admin console.
//!
//! This crate owns where the access/refresh credential pair lives:
//! - **session medium**: in-memory, gone when the process exits
//! - **persistent medium**: a file under the user's config directory,
//!   bounded by a fixed maximum age ("remember me" logins only)
//!
//! Exactly one medium holds credentials at a time; the [`CredentialStore`]
//! facade enforces that and is the only writer the rest of the system
//! talks to.

mod file;
mod keys;
mod memory;
mod store;
mod traits;

pub use file::FileStorage;
pub use keys::StorageKeys;
pub use memory::MemoryStorage;
pub use store::{
    CredentialPair, CredentialStore, Medium, SessionMeta, StoredSession, EXPIRY_LEEWAY_SECONDS,
};
pub use traits::CredentialStorage;

use thiserror::Error;

/// Error type for storage operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Underlying medium failed (filesystem, permissions, ...)
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// Encoding/decoding error
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// No usable location for the persistent medium
    #[error("No persistent storage location available")]
    NoStorageDir,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;
