//! Storage trait definitions.

use crate::StoreResult;

/// Trait for credential storage mediums.
pub trait CredentialStorage: Send + Sync {
    /// Store a value.
    fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Retrieve a value.
    fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Delete a value. Returns true if the key existed.
    fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Check if a key exists.
    fn has(&self, key: &str) -> StoreResult<bool> {
        Ok(self.get(key)?.is_some())
    }
}
