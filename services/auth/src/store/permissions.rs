//! Permission operations

use common::config::PermissionDeletePolicy;
use common::{ConflictReason, CoreError, CoreResult};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};
use uuid::Uuid;

use super::{EntityStore, KeyIndex};
use crate::models::{NewPermission, Permission, UpdatePermission};
use crate::registry;
use crate::validation::validate_name;

impl EntityStore {
    /// Create a new permission
    pub async fn create_permission(&self, new_permission: NewPermission) -> CoreResult<Permission> {
        info!("Creating new permission: {}", new_permission.name);

        validate_name("Permission name", &new_permission.name).map_err(CoreError::Validation)?;
        validate_name("Category", &new_permission.category).map_err(CoreError::Validation)?;

        let mut tables = self.tables.write().await;
        tables.ensure_unique(KeyIndex::PermissionName, &new_permission.name, None)?;

        let now = self.clock.now();
        let permission = Permission {
            id: self.ids.entity_id(),
            name: new_permission.name.trim().to_string(),
            description: new_permission.description,
            category: new_permission.category.trim().to_string(),
            is_active: new_permission.is_active.unwrap_or(true),
            created_at: now,
            updated_at: now,
        };

        tables.reindex(KeyIndex::PermissionName, None, &permission.name, permission.id);
        tables.permissions.insert(permission.id, permission.clone());
        Ok(permission)
    }

    /// Find a permission by ID
    pub async fn get_permission(&self, id: Uuid) -> CoreResult<Permission> {
        self.tables
            .read()
            .await
            .permissions
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("permission", id))
    }

    /// All permissions, sorted by name
    pub async fn list_permissions(&self) -> Vec<Permission> {
        let tables = self.tables.read().await;
        let mut permissions: Vec<Permission> = tables.permissions.values().cloned().collect();
        permissions.sort_by(|a, b| a.name.cmp(&b.name));
        permissions
    }

    /// Permissions grouped by category
    pub async fn permissions_by_category(&self) -> BTreeMap<String, Vec<Permission>> {
        self.tables.read().await.registry().by_category()
    }

    /// Resolve permission references given as ids or names
    pub async fn resolve_permissions(&self, refs: &[String]) -> CoreResult<BTreeSet<Uuid>> {
        self.tables.read().await.registry().resolve(refs)
    }

    /// Roles whose direct permission set contains the permission
    pub async fn permission_conflicts(&self, id: Uuid) -> CoreResult<Vec<Uuid>> {
        let tables = self.tables.read().await;
        if !tables.permissions.contains_key(&id) {
            return Err(CoreError::not_found("permission", id));
        }
        Ok(registry::check_conflicts(&tables.roles, id))
    }

    /// Apply a partial update
    pub async fn update_permission(
        &self,
        id: Uuid,
        changes: UpdatePermission,
    ) -> CoreResult<Permission> {
        info!("Updating permission: {}", id);

        if let Some(name) = changes.name.as_deref() {
            validate_name("Permission name", name).map_err(CoreError::Validation)?;
        }
        if let Some(category) = changes.category.as_deref() {
            validate_name("Category", category).map_err(CoreError::Validation)?;
        }

        let mut tables = self.tables.write().await;
        let current = tables
            .permissions
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("permission", id))?;

        if let Some(name) = changes.name.as_deref() {
            tables.ensure_unique(KeyIndex::PermissionName, name, Some(id))?;
        }

        let mut permission = current.clone();
        if let Some(name) = changes.name {
            permission.name = name.trim().to_string();
        }
        if let Some(description) = changes.description {
            permission.description = description;
        }
        if let Some(category) = changes.category {
            permission.category = category.trim().to_string();
        }
        if let Some(is_active) = changes.is_active {
            permission.is_active = is_active;
        }
        permission.updated_at = self.clock.now();

        if permission.name != current.name {
            tables.reindex(
                KeyIndex::PermissionName,
                Some(&current.name),
                &permission.name,
                id,
            );
        }
        tables.permissions.insert(id, permission.clone());
        Ok(permission)
    }

    /// Remove a permission
    ///
    /// Roles still granting it block the delete, or lose it in the same
    /// commit, depending on the configured policy.
    pub async fn delete_permission(&self, id: Uuid) -> CoreResult<Permission> {
        info!("Deleting permission: {}", id);

        let mut tables = self.tables.write().await;
        if !tables.permissions.contains_key(&id) {
            return Err(CoreError::not_found("permission", id));
        }

        let role_ids = registry::check_conflicts(&tables.roles, id);
        if !role_ids.is_empty() {
            match self.policy.permission_delete {
                PermissionDeletePolicy::Block => {
                    warn!(
                        "Refusing to delete permission {}: granted by {} role(s)",
                        id,
                        role_ids.len()
                    );
                    return Err(CoreError::Conflict {
                        entity: "permission",
                        id,
                        reasons: vec![ConflictReason::PermissionInUse { role_ids }],
                    });
                }
                PermissionDeletePolicy::Cascade => {
                    let now = self.clock.now();
                    for role_id in &role_ids {
                        if let Some(role) = tables.roles.get_mut(role_id) {
                            role.permissions.remove(&id);
                            role.updated_at = now;
                        }
                    }
                    info!("Removed permission {} from {} role(s)", id, role_ids.len());
                }
            }
        }

        let permission = tables
            .permissions
            .remove(&id)
            .ok_or_else(|| CoreError::not_found("permission", id))?;
        tables.unindex(KeyIndex::PermissionName, &permission.name);
        Ok(permission)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{store, store_with};
    use super::*;
    use crate::models::NewRole;
    use common::config::PolicyConfig;

    fn new_permission(name: &str, category: &str) -> NewPermission {
        NewPermission {
            name: name.to_string(),
            description: format!("{} access", name),
            category: category.to_string(),
            is_active: None,
        }
    }

    #[tokio::test]
    async fn create_rejects_duplicate_names() {
        let store = store();
        store
            .create_permission(new_permission("user.read", "User Management"))
            .await
            .unwrap();

        let err = store
            .create_permission(new_permission("User.Read", "User Management"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "DUPLICATE_KEY");
    }

    #[tokio::test]
    async fn category_is_required() {
        let store = store();
        let err = store
            .create_permission(new_permission("user.read", " "))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION");
    }

    #[tokio::test]
    async fn delete_in_use_permission_is_blocked() {
        let store = store();
        let read = store
            .create_permission(new_permission("read", "Content Management"))
            .await
            .unwrap();
        let role = store
            .create_role(NewRole {
                name: "Viewer".into(),
                permissions: BTreeSet::from([read.id]),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(store.permission_conflicts(read.id).await.unwrap(), vec![role.role.id]);

        let err = store.delete_permission(read.id).await.unwrap_err();
        assert_eq!(
            err,
            CoreError::Conflict {
                entity: "permission",
                id: read.id,
                reasons: vec![ConflictReason::PermissionInUse {
                    role_ids: vec![role.role.id]
                }],
            }
        );
        assert!(store.get_permission(read.id).await.is_ok());
    }

    #[tokio::test]
    async fn cascade_policy_strips_permission_from_roles() {
        let (store, _) = store_with(PolicyConfig {
            permission_delete: PermissionDeletePolicy::Cascade,
            ..Default::default()
        });
        let read = store
            .create_permission(new_permission("read", "Content Management"))
            .await
            .unwrap();
        let role = store
            .create_role(NewRole {
                name: "Viewer".into(),
                permissions: BTreeSet::from([read.id]),
                ..Default::default()
            })
            .await
            .unwrap();

        store.delete_permission(read.id).await.unwrap();

        let role = store.get_role(role.role.id).await.unwrap();
        assert!(role.role.permissions.is_empty());
        assert!(role.effective_permissions.is_empty());
        assert!(store.list_permissions().await.is_empty());
    }

    #[tokio::test]
    async fn rename_frees_old_name() {
        let store = store();
        let permission = store
            .create_permission(new_permission("reports.view", "Reporting"))
            .await
            .unwrap();

        store
            .update_permission(
                permission.id,
                UpdatePermission {
                    name: Some("reports.read".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let resolved = store
            .resolve_permissions(&["REPORTS.READ".to_string()])
            .await
            .unwrap();
        assert_eq!(resolved, BTreeSet::from([permission.id]));
        store
            .create_permission(new_permission("reports.view", "Reporting"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn permissions_grouped_by_category() {
        let store = store();
        for (name, category) in [
            ("user.read", "User Management"),
            ("user.write", "User Management"),
            ("view_reports", "Reporting"),
        ] {
            store
                .create_permission(new_permission(name, category))
                .await
                .unwrap();
        }

        let groups = store.permissions_by_category().await;
        assert_eq!(groups["User Management"].len(), 2);
        assert_eq!(groups["Reporting"][0].name, "view_reports");
    }
}
