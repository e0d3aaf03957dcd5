//! File-backed storage for "remember me" logins.

use crate::{CredentialStorage, StoreError, StoreResult};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Maximum age of a persisted record, in days. Matches the extended
/// "remember me" session length granted by the backend.
pub const MAX_RECORD_AGE_DAYS: i64 = 30;

#[derive(Debug, Default, Serialize, Deserialize)]
struct FileRecord {
    /// When the record was first written. Records older than the fixed
    /// bound are discarded on read.
    stored_at: Option<DateTime<Utc>>,
    entries: HashMap<String, String>,
}

/// Persistent storage bounded by a fixed expiry. Used only when the user
/// asked to remain signed in.
pub struct FileStorage {
    path: PathBuf,
    max_age: Duration,
    // Serializes read-modify-write cycles against the backing file.
    lock: Mutex<()>,
}

impl FileStorage {
    /// Create a file-backed medium at the given path with the default
    /// 30-day bound.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_max_age(path, Duration::days(MAX_RECORD_AGE_DAYS))
    }

    /// Create a file-backed medium with a custom age bound.
    pub fn with_max_age(path: impl Into<PathBuf>, max_age: Duration) -> Self {
        Self {
            path: path.into(),
            max_age,
            lock: Mutex::new(()),
        }
    }

    /// Default location under the user's config directory.
    pub fn default_path() -> StoreResult<PathBuf> {
        let base = dirs::config_dir().ok_or(StoreError::NoStorageDir)?;
        Ok(base.join("admin-console").join("credentials.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_record(&self) -> StoreResult<FileRecord> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(FileRecord::default())
            }
            Err(e) => return Err(e.into()),
        };

        let record: FileRecord = match serde_json::from_str(&raw) {
            Ok(r) => r,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Corrupt credential file, discarding");
                let _ = fs::remove_file(&self.path);
                return Ok(FileRecord::default());
            }
        };

        if let Some(stored_at) = record.stored_at {
            if Utc::now().signed_duration_since(stored_at) > self.max_age {
                debug!(path = %self.path.display(), "Persisted credentials exceeded the age bound, discarding");
                let _ = fs::remove_file(&self.path);
                return Ok(FileRecord::default());
            }
        }

        Ok(record)
    }

    fn write_record(&self, record: &FileRecord) -> StoreResult<()> {
        if record.entries.is_empty() {
            if self.path.exists() {
                fs::remove_file(&self.path)?;
            }
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string(record).map_err(|e| StoreError::Encoding(e.to_string()))?;

        // Write-then-rename so a crash never leaves a half-written file.
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, &json)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp, fs::Permissions::from_mode(0o600))?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl CredentialStorage for FileStorage {
    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let _guard = self.lock.lock().unwrap();
        let mut record = self.read_record()?;
        if record.stored_at.is_none() {
            record.stored_at = Some(Utc::now());
        }
        record.entries.insert(key.to_string(), value.to_string());
        self.write_record(&record)
    }

    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let _guard = self.lock.lock().unwrap();
        let record = self.read_record()?;
        Ok(record.entries.get(key).cloned())
    }

    fn delete(&self, key: &str) -> StoreResult<bool> {
        let _guard = self.lock.lock().unwrap();
        let mut record = self.read_record()?;
        let existed = record.entries.remove(key).is_some();
        if record.entries.is_empty() {
            record.stored_at = None;
        }
        self.write_record(&record)?;
        Ok(existed)
    }
}
