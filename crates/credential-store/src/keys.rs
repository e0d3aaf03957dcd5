//! Storage key constants.

/// Storage keys shared by both credential mediums.
pub struct StorageKeys;

impl StorageKeys {
    /// Access token presented on privileged calls
    pub const ACCESS_TOKEN: &'static str = "access_token";

    /// Refresh token, single-use per exchange
    pub const REFRESH_TOKEN: &'static str = "refresh_token";

    /// Session metadata (JSON)
    pub const SESSION_META: &'static str = "session_meta";
}
