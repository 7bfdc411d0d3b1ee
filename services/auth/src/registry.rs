//! Permission registry
//!
//! Validates the permission references carried by roles and reports
//! which roles still depend on a permission.

use common::{CoreError, CoreResult};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use uuid::Uuid;

use crate::models::{Permission, Role};
use crate::store::natural_key;

/// Read-only view over the permission table and its name index
pub struct PermissionRegistry<'a> {
    permissions: &'a HashMap<Uuid, Permission>,
    names: &'a HashMap<String, Uuid>,
}

impl<'a> PermissionRegistry<'a> {
    pub fn new(permissions: &'a HashMap<Uuid, Permission>, names: &'a HashMap<String, Uuid>) -> Self {
        Self { permissions, names }
    }

    /// Fail with `InvalidPermissions` listing every unknown id
    pub fn validate(&self, ids: &BTreeSet<Uuid>) -> CoreResult<()> {
        let unknown: Vec<String> = ids
            .iter()
            .filter(|id| !self.permissions.contains_key(id))
            .map(Uuid::to_string)
            .collect();

        if unknown.is_empty() {
            Ok(())
        } else {
            Err(CoreError::InvalidPermissions(unknown))
        }
    }

    /// Resolve references given either as ids or as names (case-insensitive)
    pub fn resolve(&self, refs: &[String]) -> CoreResult<BTreeSet<Uuid>> {
        let mut resolved = BTreeSet::new();
        let mut unknown = Vec::new();

        for reference in refs {
            let by_id = Uuid::parse_str(reference)
                .ok()
                .filter(|id| self.permissions.contains_key(id));
            let found = by_id.or_else(|| self.names.get(&natural_key(reference)).copied());

            match found {
                Some(id) => {
                    resolved.insert(id);
                }
                None => unknown.push(reference.clone()),
            }
        }

        if unknown.is_empty() {
            Ok(resolved)
        } else {
            Err(CoreError::InvalidPermissions(unknown))
        }
    }

    /// Permissions grouped by category, each group sorted by name
    pub fn by_category(&self) -> BTreeMap<String, Vec<Permission>> {
        let mut groups: BTreeMap<String, Vec<Permission>> = BTreeMap::new();
        for permission in self.permissions.values() {
            groups
                .entry(permission.category.clone())
                .or_default()
                .push(permission.clone());
        }
        for group in groups.values_mut() {
            group.sort_by(|a, b| a.name.cmp(&b.name));
        }
        groups
    }
}

/// Roles whose direct permission set contains `permission_id`, sorted
pub fn check_conflicts(roles: &HashMap<Uuid, Role>, permission_id: Uuid) -> Vec<Uuid> {
    let mut role_ids: Vec<Uuid> = roles
        .values()
        .filter(|role| role.permissions.contains(&permission_id))
        .map(|role| role.id)
        .collect();
    role_ids.sort();
    role_ids
}
