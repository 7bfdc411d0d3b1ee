//! Configuration for the RBAC core
//!
//! Values are read from environment variables prefixed with `RBAC` and
//! using `__` as the nesting separator, for example
//! `RBAC_SESSION__MAX_CONCURRENT_SESSIONS=5`. Every field has a default.

use config::{Config, ConfigError, Environment};
use serde::Deserialize;
use std::time::Duration;

/// Session lifetime settings
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SessionConfig {
    /// Maximum number of active sessions per user (default: 3)
    pub max_concurrent_sessions: usize,
    /// Sliding session lifetime in seconds (default: 30 minutes)
    pub session_timeout_secs: i64,
    /// Remaining lifetime at which a validation slides the expiry (default: 5 minutes)
    pub refresh_threshold_secs: i64,
    /// Maximum idle time in seconds (default: 15 minutes)
    pub max_inactivity_secs: i64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_concurrent_sessions: 3,
            session_timeout_secs: 30 * 60,
            refresh_threshold_secs: 5 * 60,
            max_inactivity_secs: 15 * 60,
        }
    }
}

/// Second-factor challenge settings
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MfaConfig {
    /// Challenge lifetime in seconds (default: 15 minutes)
    pub challenge_ttl_secs: i64,
    /// Wrong codes tolerated per challenge before it is discarded (default: 5)
    pub max_attempts: u32,
}

impl Default for MfaConfig {
    fn default() -> Self {
        Self {
            challenge_ttl_secs: 15 * 60,
            max_attempts: 5,
        }
    }
}

/// Per-aggregate lock settings
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LockConfig {
    /// Bounded wait for acquiring aggregate locks, in milliseconds (default: 500)
    pub acquire_timeout_ms: u64,
}

impl LockConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            acquire_timeout_ms: 500,
        }
    }
}

/// What happens to roles when a permission they reference is deleted
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PermissionDeletePolicy {
    /// Refuse with a conflict
    #[default]
    Block,
    /// Remove the permission from every role in the same commit
    Cascade,
}

/// What happens to users when a role they hold is deleted
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RoleDeletePolicy {
    /// Refuse with a conflict
    #[default]
    Block,
    /// Remove the role from every user in the same commit
    Detach,
}

/// Referential policies for deletes
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PolicyConfig {
    pub permission_delete: PermissionDeletePolicy,
    pub role_delete_with_users: RoleDeletePolicy,
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CoreConfig {
    pub session: SessionConfig,
    pub mfa: MfaConfig,
    pub locks: LockConfig,
    pub policy: PolicyConfig,
}

impl CoreConfig {
    /// Create a new CoreConfig from environment variables
    ///
    /// # Environment Variables
    /// - `RBAC_SESSION__MAX_CONCURRENT_SESSIONS` (default: 3)
    /// - `RBAC_SESSION__SESSION_TIMEOUT_SECS` (default: 1800)
    /// - `RBAC_SESSION__REFRESH_THRESHOLD_SECS` (default: 300)
    /// - `RBAC_SESSION__MAX_INACTIVITY_SECS` (default: 900)
    /// - `RBAC_MFA__CHALLENGE_TTL_SECS` (default: 900)
    /// - `RBAC_MFA__MAX_ATTEMPTS` (default: 5)
    /// - `RBAC_LOCKS__ACQUIRE_TIMEOUT_MS` (default: 500)
    /// - `RBAC_POLICY__PERMISSION_DELETE`: `block` or `cascade` (default: block)
    /// - `RBAC_POLICY__ROLE_DELETE_WITH_USERS`: `block` or `detach` (default: block)
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(
                Environment::with_prefix("RBAC")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_core_config_defaults() {
        let config = CoreConfig::from_env().unwrap();
        assert_eq!(config, CoreConfig::default());
        assert_eq!(config.session.max_concurrent_sessions, 3);
        assert_eq!(config.mfa.challenge_ttl_secs, 900);
        assert_eq!(config.policy.permission_delete, PermissionDeletePolicy::Block);
    }

    #[test]
    #[serial]
    fn test_core_config_from_env_with_custom_values() {
        unsafe {
            std::env::set_var("RBAC_SESSION__MAX_CONCURRENT_SESSIONS", "5");
            std::env::set_var("RBAC_MFA__MAX_ATTEMPTS", "2");
            std::env::set_var("RBAC_POLICY__PERMISSION_DELETE", "cascade");
        }

        let config = CoreConfig::from_env().unwrap();
        assert_eq!(config.session.max_concurrent_sessions, 5);
        assert_eq!(config.session.session_timeout_secs, 1800);
        assert_eq!(config.mfa.max_attempts, 2);
        assert_eq!(
            config.policy.permission_delete,
            PermissionDeletePolicy::Cascade
        );

        unsafe {
            std::env::remove_var("RBAC_SESSION__MAX_CONCURRENT_SESSIONS");
            std::env::remove_var("RBAC_MFA__MAX_ATTEMPTS");
            std::env::remove_var("RBAC_POLICY__PERMISSION_DELETE");
        }
    }
}
