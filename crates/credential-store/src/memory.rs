//! In-memory storage, scoped to the process lifetime.

use crate::{CredentialStorage, StoreResult};
use std::collections::HashMap;
use std::sync::Mutex;

/// Session-scoped storage. Everything here is gone when the process exits,
/// which is exactly the point: logins without "remember me" land here.
#[derive(Default)]
pub struct MemoryStorage {
    data: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStorage for MemoryStorage {
    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut data = self.data.lock().unwrap();
        data.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let data = self.data.lock().unwrap();
        Ok(data.get(key).cloned())
    }

    fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut data = self.data.lock().unwrap();
        Ok(data.remove(key).is_some())
    }
}
