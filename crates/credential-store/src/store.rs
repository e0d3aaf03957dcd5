//! Typed facade over the two credential mediums.

use crate::{CredentialStorage, FileStorage, MemoryStorage, StorageKeys, StoreError, StoreResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// An access token within this many seconds of its nominal expiry is
/// treated as already expired, so calls never race the server clock.
pub const EXPIRY_LEEWAY_SECONDS: i64 = 60;

/// The access/refresh credential pair issued on login or refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialPair {
    pub access_token: String,
    pub refresh_token: String,
    /// When the access token expires.
    pub expires_at: DateTime<Utc>,
}

impl CredentialPair {
    /// True once the access token is within the expiry leeway.
    pub fn is_expired(&self) -> bool {
        self.expires_at
            .signed_duration_since(Utc::now())
            .num_seconds()
            < EXPIRY_LEEWAY_SECONDS
    }
}

/// Session metadata persisted alongside the tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMeta {
    /// Subject id of the authenticated identity
    pub user_id: String,
    /// Email, when the backend reported one
    #[serde(default)]
    pub email: Option<String>,
}

/// Which medium holds the credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Medium {
    /// In-memory, cleared when the process exits
    Session,
    /// File-backed, bounded by a fixed expiry ("remember me")
    Persistent,
}

/// Everything the store knows about the current session.
#[derive(Debug, Clone)]
pub struct StoredSession {
    pub pair: CredentialPair,
    pub meta: SessionMeta,
    pub medium: Medium,
}

/// Facade over the session-scoped and persistent mediums.
///
/// Only one medium is populated at a time; `store` clears the other
/// medium before writing. All mutation funnels through the session
/// manager, so no interior locking beyond what the mediums provide.
pub struct CredentialStore {
    session: Box<dyn CredentialStorage>,
    persistent: Box<dyn CredentialStorage>,
}

impl CredentialStore {
    pub fn new(
        session: Box<dyn CredentialStorage>,
        persistent: Box<dyn CredentialStorage>,
    ) -> Self {
        Self {
            session,
            persistent,
        }
    }

    /// Store with the default mediums: in-memory for the session medium,
    /// a file under the user's config directory for the persistent one.
    pub fn open_default() -> StoreResult<Self> {
        let path = FileStorage::default_path()?;
        Ok(Self::new(
            Box::new(MemoryStorage::new()),
            Box::new(FileStorage::new(path)),
        ))
    }

    /// Both mediums in-memory. Useful for tests and ephemeral embeds.
    pub fn in_memory() -> Self {
        Self::new(
            Box::new(MemoryStorage::new()),
            Box::new(MemoryStorage::new()),
        )
    }

    fn medium(&self, medium: Medium) -> &dyn CredentialStorage {
        match medium {
            Medium::Session => self.session.as_ref(),
            Medium::Persistent => self.persistent.as_ref(),
        }
    }

    fn clear_medium(&self, medium: Medium) -> StoreResult<()> {
        let storage = self.medium(medium);
        let _ = storage.delete(StorageKeys::ACCESS_TOKEN)?;
        let _ = storage.delete(StorageKeys::REFRESH_TOKEN)?;
        let _ = storage.delete(StorageKeys::SESSION_META)?;
        Ok(())
    }

    fn write(&self, medium: Medium, pair: &CredentialPair, meta: &SessionMeta) -> StoreResult<()> {
        let storage = self.medium(medium);
        let pair_meta = PersistedMeta {
            user_id: meta.user_id.clone(),
            email: meta.email.clone(),
            expires_at: pair.expires_at,
        };
        let json =
            serde_json::to_string(&pair_meta).map_err(|e| StoreError::Encoding(e.to_string()))?;
        storage.set(StorageKeys::ACCESS_TOKEN, &pair.access_token)?;
        storage.set(StorageKeys::REFRESH_TOKEN, &pair.refresh_token)?;
        storage.set(StorageKeys::SESSION_META, &json)?;
        Ok(())
    }

    fn read(&self, medium: Medium) -> StoreResult<Option<StoredSession>> {
        let storage = self.medium(medium);
        let access_token = match storage.get(StorageKeys::ACCESS_TOKEN)? {
            Some(t) => t,
            None => return Ok(None),
        };
        let refresh_token = match storage.get(StorageKeys::REFRESH_TOKEN)? {
            Some(t) => t,
            None => return Ok(None),
        };
        let meta_json = match storage.get(StorageKeys::SESSION_META)? {
            Some(j) => j,
            None => return Ok(None),
        };
        let persisted: PersistedMeta =
            serde_json::from_str(&meta_json).map_err(|e| StoreError::Encoding(e.to_string()))?;

        Ok(Some(StoredSession {
            pair: CredentialPair {
                access_token,
                refresh_token,
                expires_at: persisted.expires_at,
            },
            meta: SessionMeta {
                user_id: persisted.user_id,
                email: persisted.email,
            },
            medium,
        }))
    }

    /// Store a credential pair in the chosen medium, clearing the other.
    pub fn store(
        &self,
        pair: &CredentialPair,
        meta: &SessionMeta,
        medium: Medium,
    ) -> StoreResult<()> {
        let other = match medium {
            Medium::Session => Medium::Persistent,
            Medium::Persistent => Medium::Session,
        };
        self.clear_medium(other)?;
        self.write(medium, pair, meta)?;
        debug!(medium = ?medium, user_id = %meta.user_id, "Stored credential pair");
        Ok(())
    }

    /// Replace the tokens in whichever medium is active. Used for refresh
    /// rotation: the old pair must never outlive the exchange.
    pub fn rotate(&self, pair: &CredentialPair) -> StoreResult<()> {
        let current = self.load()?.ok_or_else(|| {
            StoreError::Backend("No stored session to rotate".to_string())
        })?;
        self.write(current.medium, pair, &current.meta)?;
        debug!(medium = ?current.medium, "Rotated credential pair");
        Ok(())
    }

    /// Load the stored session, if any. The session medium wins; the two
    /// are mutually exclusive by construction but checked in order anyway.
    pub fn load(&self) -> StoreResult<Option<StoredSession>> {
        if let Some(found) = self.read(Medium::Session)? {
            return Ok(Some(found));
        }
        self.read(Medium::Persistent)
    }

    /// Which medium currently holds credentials, if any.
    pub fn active_medium(&self) -> StoreResult<Option<Medium>> {
        Ok(self.load()?.map(|s| s.medium))
    }

    /// True when no session is stored or the access token is past the
    /// expiry leeway.
    pub fn is_expired(&self) -> StoreResult<bool> {
        match self.load()? {
            Some(stored) => Ok(stored.pair.is_expired()),
            None => Ok(true),
        }
    }

    /// Clear both mediums.
    pub fn clear(&self) -> StoreResult<()> {
        self.clear_medium(Medium::Session)?;
        self.clear_medium(Medium::Persistent)?;
        Ok(())
    }
}

/// On-disk shape of the session metadata entry.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedMeta {
    user_id: String,
    #[serde(default)]
    email: Option<String>,
    expires_at: DateTime<Utc>,
}
