//! Error taxonomy shared by every component of the RBAC core
//!
//! Each variant maps to a stable machine-readable code (see
//! [`CoreError::code`]) so that outer layers can surface the kind of
//! failure without parsing human-readable messages.

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Reason a delete was refused because other records still depend on the target
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ConflictReason {
    /// Roles whose `inherits_from` points at the target role
    RoleHasChildren { role_ids: Vec<Uuid> },
    /// Users that still hold the target role
    RoleAssignedToUsers { user_ids: Vec<Uuid> },
    /// Roles whose direct permission set contains the target permission
    PermissionInUse { role_ids: Vec<Uuid> },
}

/// Lockable aggregate, used to report which lock timed out
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum AggregateKey {
    Role(Uuid),
    User(Uuid),
}

impl std::fmt::Display for AggregateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AggregateKey::Role(id) => write!(f, "role:{}", id),
            AggregateKey::User(id) => write!(f, "user:{}", id),
        }
    }
}

/// Custom error type for the RBAC core
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// No record with the given id
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The natural key (email or name) is already taken
    #[error("{entity} already exists: {key}")]
    DuplicateKey { entity: &'static str, key: String },

    /// Dependent records block the operation
    #[error("{entity} {id} is still referenced")]
    Conflict {
        entity: &'static str,
        id: Uuid,
        reasons: Vec<ConflictReason>,
    },

    /// One or more permission references are unknown
    #[error("Invalid permissions: {}", .0.join(", "))]
    InvalidPermissions(Vec<String>),

    /// One or more role references are unknown
    #[error("Invalid roles: {}", .0.join(", "))]
    InvalidRoles(Vec<String>),

    /// The inheritance edge would close a cycle, or a cycle was found while walking
    #[error("Circular inheritance detected for role {role_id}")]
    CyclicInheritance { role_id: Uuid },

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Account is inactive")]
    AccountInactive,

    #[error("Invalid MFA session")]
    InvalidChallenge,

    #[error("Invalid verification code format")]
    InvalidCodeFormat,

    #[error("Invalid verification code")]
    InvalidCode,

    #[error("Session has expired")]
    SessionExpired,

    #[error("Session is inactive")]
    SessionInactive,

    #[error("Session timeout due to inactivity")]
    InactivityTimeout,

    /// A per-aggregate lock could not be acquired in time; safe to retry
    #[error("Resource busy: {aggregate}")]
    Busy { aggregate: AggregateKey },

    /// Malformed input
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        CoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn duplicate(entity: &'static str, key: impl Into<String>) -> Self {
        CoreError::DuplicateKey {
            entity,
            key: key.into(),
        }
    }

    /// Stable machine-readable code for this error kind
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::NotFound { .. } => "NOT_FOUND",
            CoreError::DuplicateKey { .. } => "DUPLICATE_KEY",
            CoreError::Conflict { .. } => "CONFLICT",
            CoreError::InvalidPermissions(_) => "INVALID_PERMISSIONS",
            CoreError::InvalidRoles(_) => "INVALID_ROLES",
            CoreError::CyclicInheritance { .. } => "CYCLIC_INHERITANCE",
            CoreError::InvalidCredentials => "INVALID_CREDENTIALS",
            CoreError::AccountInactive => "ACCOUNT_INACTIVE",
            CoreError::InvalidChallenge => "INVALID_CHALLENGE",
            CoreError::InvalidCodeFormat => "INVALID_CODE_FORMAT",
            CoreError::InvalidCode => "INVALID_CODE",
            CoreError::SessionExpired => "SESSION_EXPIRED",
            CoreError::SessionInactive => "SESSION_INACTIVE",
            CoreError::InactivityTimeout => "INACTIVITY_TIMEOUT",
            CoreError::Busy { .. } => "BUSY",
            CoreError::Validation(_) => "VALIDATION",
            CoreError::Internal(_) => "INTERNAL",
        }
    }

    /// Only lock contention may be retried by the caller
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::Busy { .. })
    }
}

/// Type alias for Result with CoreError
pub type CoreResult<T> = Result<T, CoreError>;
