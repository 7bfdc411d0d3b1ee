//! Entity store for users, roles and permissions
//!
//! The store exclusively owns the three entity tables and their unique
//! natural-key indexes (email for users, name for roles and
//! permissions, all case-insensitive). Reads take a shared guard and see
//! a consistent snapshot; every write validates and commits under one
//! exclusive guard, so a failed validation never leaves a partial
//! change behind.

mod locks;
mod permissions;
mod roles;
mod users;

pub use locks::{AggregateGuard, LockManager};

use common::config::PolicyConfig;
use common::{Clock, CoreError, CoreResult, IdGenerator};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{Permission, Role, User};
use crate::registry::PermissionRegistry;

/// Normalised form of a natural key
pub(crate) fn natural_key(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Entity tables with their unique secondary indexes
#[derive(Debug, Default)]
pub(crate) struct Tables {
    pub(crate) users: HashMap<Uuid, User>,
    pub(crate) roles: HashMap<Uuid, Role>,
    pub(crate) permissions: HashMap<Uuid, Permission>,
    user_emails: HashMap<String, Uuid>,
    role_names: HashMap<String, Uuid>,
    permission_names: HashMap<String, Uuid>,
}

/// Which unique index a natural key lives in
#[derive(Debug, Clone, Copy)]
pub(crate) enum KeyIndex {
    UserEmail,
    RoleName,
    PermissionName,
}

impl KeyIndex {
    fn entity(self) -> &'static str {
        match self {
            KeyIndex::UserEmail => "user",
            KeyIndex::RoleName => "role",
            KeyIndex::PermissionName => "permission",
        }
    }
}

impl Tables {
    fn index(&self, index: KeyIndex) -> &HashMap<String, Uuid> {
        match index {
            KeyIndex::UserEmail => &self.user_emails,
            KeyIndex::RoleName => &self.role_names,
            KeyIndex::PermissionName => &self.permission_names,
        }
    }

    fn index_mut(&mut self, index: KeyIndex) -> &mut HashMap<String, Uuid> {
        match index {
            KeyIndex::UserEmail => &mut self.user_emails,
            KeyIndex::RoleName => &mut self.role_names,
            KeyIndex::PermissionName => &mut self.permission_names,
        }
    }

    /// Fail with `DuplicateKey` if `key` belongs to a record other than `owner`
    pub(crate) fn ensure_unique(
        &self,
        index: KeyIndex,
        key: &str,
        owner: Option<Uuid>,
    ) -> CoreResult<()> {
        match self.index(index).get(&natural_key(key)) {
            Some(existing) if Some(*existing) != owner => {
                Err(CoreError::duplicate(index.entity(), key.trim()))
            }
            _ => Ok(()),
        }
    }

    /// Point `key` at `id`, dropping the record's previous key if it changed
    pub(crate) fn reindex(&mut self, index: KeyIndex, old: Option<&str>, new: &str, id: Uuid) {
        let map = self.index_mut(index);
        if let Some(old) = old {
            map.remove(&natural_key(old));
        }
        map.insert(natural_key(new), id);
    }

    pub(crate) fn unindex(&mut self, index: KeyIndex, key: &str) {
        self.index_mut(index).remove(&natural_key(key));
    }

    pub(crate) fn lookup(&self, index: KeyIndex, key: &str) -> Option<Uuid> {
        self.index(index).get(&natural_key(key)).copied()
    }

    pub(crate) fn registry(&self) -> PermissionRegistry<'_> {
        PermissionRegistry::new(&self.permissions, &self.permission_names)
    }

    /// Fail with `InvalidRoles` listing every role id that does not exist
    pub(crate) fn validate_roles<'a>(
        &self,
        ids: impl IntoIterator<Item = &'a Uuid>,
    ) -> CoreResult<()> {
        let unknown: Vec<String> = ids
            .into_iter()
            .filter(|id| !self.roles.contains_key(id))
            .map(Uuid::to_string)
            .collect();

        if unknown.is_empty() {
            Ok(())
        } else {
            Err(CoreError::InvalidRoles(unknown))
        }
    }
}

/// Entity store
pub struct EntityStore {
    tables: RwLock<Tables>,
    locks: Arc<LockManager>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    policy: PolicyConfig,
}

impl EntityStore {
    /// Create an empty store
    pub fn new(
        locks: Arc<LockManager>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        policy: PolicyConfig,
    ) -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            locks,
            clock,
            ids,
            policy,
        }
    }

    /// Drop every record, keeping the collaborators
    pub async fn clear(&self) {
        *self.tables.write().await = Tables::default();
    }
}
