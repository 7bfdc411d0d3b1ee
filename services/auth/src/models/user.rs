//! User model and related functionality

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Account status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Active,
    Inactive,
}

/// User entity
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub status: UserStatus,
    /// Assigned role ids; every id resolves to an existing role
    pub roles: BTreeSet<Uuid>,
    /// Argon2 PHC string; `None` for accounts that cannot sign in with a password
    #[serde(skip_serializing, default)]
    pub password_hash: Option<String>,
    pub mfa_enabled: bool,
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active
    }
}

/// New user creation payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    pub email: String,
    pub name: String,
    /// Plaintext password, hashed before it reaches the store
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub roles: BTreeSet<Uuid>,
    #[serde(default)]
    pub status: Option<UserStatus>,
    #[serde(default)]
    pub mfa_enabled: bool,
}

/// User update payload
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUser {
    pub email: Option<String>,
    pub name: Option<String>,
    pub password: Option<String>,
    pub status: Option<UserStatus>,
    pub roles: Option<BTreeSet<Uuid>>,
    pub mfa_enabled: Option<bool>,
}
