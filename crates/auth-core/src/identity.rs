//! The authenticated subject and its role/permission graph.
//!
//! These are plain data types mirroring what the backend reports on
//! login and who-am-i. Roles and permissions are read-only reference
//! data from the client's perspective; evaluation over them lives in
//! `permissions.rs`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An atomic capability keyed by (resource, action), e.g. "users.create".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub id: Uuid,
    /// Stable "resource.action" name
    pub name: String,
    pub resource: String,
    pub action: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// A named bundle of permissions, assignable to identities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Seeded roles cannot be modified or deleted server-side.
    #[serde(default)]
    pub is_system_role: bool,
    #[serde(default)]
    pub permissions: Vec<Permission>,
}

/// The authenticated subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: Uuid,
    pub email: String,
    #[serde(default)]
    pub username: Option<String>,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub is_verified: bool,
    #[serde(default)]
    pub is_superuser: bool,
    /// Whether a time-based second factor is required at login.
    #[serde(default, rename = "is_2fa_enabled")]
    pub is_two_factor_enabled: bool,
    #[serde(default)]
    pub roles: Vec<Role>,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_language() -> String {
    "en".to_string()
}

impl Identity {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}
