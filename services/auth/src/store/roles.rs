//! Role operations
//!
//! Every write that sets or changes `inherits_from` first locks the
//! role and the proposed parent chain (ascending id order), then
//! re-validates the edge under the write guard before committing.

use common::config::RoleDeletePolicy;
use common::{AggregateKey, ConflictReason, CoreError, CoreResult};
use std::collections::BTreeSet;
use tracing::{info, warn};
use uuid::Uuid;

use super::{AggregateGuard, EntityStore, KeyIndex};
use crate::graph;
use crate::models::{NewRole, Role, RoleNode, RoleView, UpdateRole};
use crate::validation::{MAX_NAME_LEN, validate_name};

/// `"<name> <suffix>"`, shortening the name so the result stays within bounds
fn copy_name(name: &str, suffix: &str) -> String {
    let room = MAX_NAME_LEN.saturating_sub(suffix.chars().count() + 1);
    let base: String = name.chars().take(room).collect();
    format!("{} {}", base.trim_end(), suffix)
}

impl EntityStore {
    /// Lock `role_id` together with every role on the chain above `parent`
    async fn lock_for_reparent(
        &self,
        role_id: Uuid,
        parent: Option<Uuid>,
    ) -> CoreResult<AggregateGuard> {
        let mut keys = vec![AggregateKey::Role(role_id)];
        if let Some(parent) = parent {
            let tables = self.tables.read().await;
            keys.extend(
                graph::chain(&tables.roles, parent)
                    .into_iter()
                    .map(AggregateKey::Role),
            );
        }
        self.locks.acquire_all(keys).await
    }

    /// Create a new role
    pub async fn create_role(&self, new_role: NewRole) -> CoreResult<RoleView> {
        info!("Creating new role: {}", new_role.name);

        validate_name("Role name", &new_role.name).map_err(CoreError::Validation)?;

        let id = self.ids.entity_id();
        let _guard = self.lock_for_reparent(id, new_role.inherits_from).await?;

        let mut tables = self.tables.write().await;
        tables.ensure_unique(KeyIndex::RoleName, &new_role.name, None)?;
        tables.registry().validate(&new_role.permissions)?;
        graph::check_inheritance(&tables.roles, id, new_role.inherits_from)?;

        let now = self.clock.now();
        let role = Role {
            id,
            name: new_role.name.trim().to_string(),
            description: new_role.description,
            permissions: new_role.permissions,
            inherits_from: new_role.inherits_from,
            is_active: new_role.is_active.unwrap_or(true),
            created_at: now,
            updated_at: now,
        };

        tables.reindex(KeyIndex::RoleName, None, &role.name, id);
        tables.roles.insert(id, role.clone());
        Ok(graph::view(&tables.roles, &role))
    }

    /// Find a role by ID, with its effective permissions
    pub async fn get_role(&self, id: Uuid) -> CoreResult<RoleView> {
        let tables = self.tables.read().await;
        let role = tables
            .roles
            .get(&id)
            .ok_or_else(|| CoreError::not_found("role", id))?;
        Ok(graph::view(&tables.roles, role))
    }

    /// All roles, oldest first
    pub async fn list_roles(&self) -> Vec<RoleView> {
        let tables = self.tables.read().await;
        let mut roles: Vec<&Role> = tables.roles.values().collect();
        roles.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.name.cmp(&b.name)));
        roles
            .into_iter()
            .map(|role| graph::view(&tables.roles, role))
            .collect()
    }

    /// Apply a partial update; a parent change is validated like `set_inheritance`
    pub async fn update_role(&self, id: Uuid, changes: UpdateRole) -> CoreResult<RoleView> {
        info!("Updating role: {}", id);

        if let Some(name) = changes.name.as_deref() {
            validate_name("Role name", name).map_err(CoreError::Validation)?;
        }

        let _guard = match changes.inherits_from {
            Some(parent) => Some(self.lock_for_reparent(id, parent).await?),
            None => None,
        };

        let mut tables = self.tables.write().await;
        let current = tables
            .roles
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("role", id))?;

        if let Some(name) = changes.name.as_deref() {
            tables.ensure_unique(KeyIndex::RoleName, name, Some(id))?;
        }
        if let Some(permissions) = changes.permissions.as_ref() {
            tables.registry().validate(permissions)?;
        }
        if let Some(parent) = changes.inherits_from {
            graph::check_inheritance(&tables.roles, id, parent)?;
        }

        let mut role = current.clone();
        if let Some(name) = changes.name {
            role.name = name.trim().to_string();
        }
        if let Some(description) = changes.description {
            role.description = description;
        }
        if let Some(permissions) = changes.permissions {
            role.permissions = permissions;
        }
        if let Some(parent) = changes.inherits_from {
            role.inherits_from = parent;
        }
        if let Some(is_active) = changes.is_active {
            role.is_active = is_active;
        }
        role.updated_at = self.clock.now();

        if role.name != current.name {
            tables.reindex(KeyIndex::RoleName, Some(&current.name), &role.name, id);
        }
        tables.roles.insert(id, role.clone());
        Ok(graph::view(&tables.roles, &role))
    }

    /// Set or clear the parent of a role
    ///
    /// Rejected edges leave the role untouched.
    pub async fn set_inheritance(&self, role_id: Uuid, parent: Option<Uuid>) -> CoreResult<RoleView> {
        info!("Setting parent of role {} to {:?}", role_id, parent);

        let _guard = self.lock_for_reparent(role_id, parent).await?;

        let mut tables = self.tables.write().await;
        if !tables.roles.contains_key(&role_id) {
            return Err(CoreError::not_found("role", role_id));
        }
        graph::check_inheritance(&tables.roles, role_id, parent)?;

        let now = self.clock.now();
        let role = match tables.roles.get_mut(&role_id) {
            Some(role) => {
                role.inherits_from = parent;
                role.updated_at = now;
                role.clone()
            }
            None => return Err(CoreError::not_found("role", role_id)),
        };
        Ok(graph::view(&tables.roles, &role))
    }

    /// Replace the direct permission set of a role
    pub async fn assign_permissions(
        &self,
        role_id: Uuid,
        permissions: BTreeSet<Uuid>,
    ) -> CoreResult<RoleView> {
        self.update_role(
            role_id,
            UpdateRole {
                permissions: Some(permissions),
                ..Default::default()
            },
        )
        .await
    }

    /// Remove a role
    ///
    /// Fails with `Conflict` while any role inherits from it. Users
    /// holding the role block the delete or are detached, depending on
    /// the configured policy.
    pub async fn delete_role(&self, id: Uuid) -> CoreResult<Role> {
        info!("Deleting role: {}", id);

        let _guard = self.locks.acquire(AggregateKey::Role(id)).await?;

        let mut tables = self.tables.write().await;
        if !tables.roles.contains_key(&id) {
            return Err(CoreError::not_found("role", id));
        }

        let mut children: Vec<Uuid> = tables
            .roles
            .values()
            .filter(|role| role.inherits_from == Some(id))
            .map(|role| role.id)
            .collect();
        children.sort();

        let mut holders: Vec<Uuid> = tables
            .users
            .values()
            .filter(|user| user.roles.contains(&id))
            .map(|user| user.id)
            .collect();
        holders.sort();

        let mut reasons = Vec::new();
        if !children.is_empty() {
            reasons.push(ConflictReason::RoleHasChildren { role_ids: children });
        }
        if !holders.is_empty() && self.policy.role_delete_with_users == RoleDeletePolicy::Block {
            reasons.push(ConflictReason::RoleAssignedToUsers {
                user_ids: holders.clone(),
            });
        }
        if !reasons.is_empty() {
            warn!("Refusing to delete role {}: {:?}", id, reasons);
            return Err(CoreError::Conflict {
                entity: "role",
                id,
                reasons,
            });
        }

        let now = self.clock.now();
        for user_id in &holders {
            if let Some(user) = tables.users.get_mut(user_id) {
                user.roles.remove(&id);
                user.updated_at = now;
            }
        }

        let role = tables
            .roles
            .remove(&id)
            .ok_or_else(|| CoreError::not_found("role", id))?;
        tables.unindex(KeyIndex::RoleName, &role.name);
        Ok(role)
    }

    /// Copy a role under a fresh id and a `(Copy)` name
    ///
    /// Direct permissions and the parent edge are copied verbatim; the
    /// edge needs no re-validation since the new id has no descendants.
    pub async fn clone_role(&self, id: Uuid) -> CoreResult<RoleView> {
        info!("Cloning role: {}", id);

        let mut tables = self.tables.write().await;
        let source = tables
            .roles
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("role", id))?;

        let mut name = copy_name(&source.name, "(Copy)");
        let mut n = 2;
        while tables.lookup(KeyIndex::RoleName, &name).is_some() {
            name = copy_name(&source.name, &format!("(Copy {})", n));
            n += 1;
        }
        validate_name("Role name", &name).map_err(CoreError::Validation)?;

        let now = self.clock.now();
        let role = Role {
            id: self.ids.entity_id(),
            name,
            created_at: now,
            updated_at: now,
            ..source
        };

        tables.reindex(KeyIndex::RoleName, None, &role.name, role.id);
        tables.roles.insert(role.id, role.clone());
        Ok(graph::view(&tables.roles, &role))
    }

    /// Effective permissions of a role; corrupt chains fail with `CyclicInheritance`
    pub async fn effective_permissions(&self, role_id: Uuid) -> CoreResult<BTreeSet<Uuid>> {
        let tables = self.tables.read().await;
        graph::effective_permissions(&tables.roles, role_id)
    }

    /// Names of the effective permissions of a role, sorted
    pub async fn effective_permission_names(&self, role_id: Uuid) -> CoreResult<Vec<String>> {
        let tables = self.tables.read().await;
        let ids = graph::effective_permissions(&tables.roles, role_id)?;
        let mut names: Vec<String> = ids
            .iter()
            .filter_map(|id| tables.permissions.get(id))
            .map(|permission| permission.name.clone())
            .collect();
        names.sort();
        Ok(names)
    }

    /// Forest view of the inheritance relation
    pub async fn role_hierarchy(&self) -> Vec<RoleNode> {
        let tables = self.tables.read().await;
        graph::hierarchy(&tables.roles)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{store, store_with};
    use super::*;
    use crate::models::{NewPermission, NewUser};
    use common::config::PolicyConfig;

    async fn permission(store: &EntityStore, name: &str) -> Uuid {
        store
            .create_permission(NewPermission {
                name: name.to_string(),
                description: String::new(),
                category: "Content Management".to_string(),
                is_active: None,
            })
            .await
            .unwrap()
            .id
    }

    async fn role(store: &EntityStore, name: &str, perms: &[Uuid], parent: Option<Uuid>) -> RoleView {
        store
            .create_role(NewRole {
                name: name.to_string(),
                permissions: perms.iter().copied().collect(),
                inherits_from: parent,
                ..Default::default()
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn role_round_trip_without_parent() {
        let store = store();
        let read = permission(&store, "read").await;

        let created = role(&store, "Viewer", &[read], None).await;
        let fetched = store.get_role(created.role.id).await.unwrap();

        assert_eq!(fetched, created);
        assert_eq!(fetched.role.name, "Viewer");
        assert!(fetched.role.is_active);
        assert_eq!(fetched.effective_permissions, BTreeSet::from([read]));
    }

    #[tokio::test]
    async fn role_names_are_unique_ignoring_case() {
        let store = store();
        role(&store, "Manager", &[], None).await;

        let err = store
            .create_role(NewRole {
                name: "manager".into(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "DUPLICATE_KEY");
    }

    #[tokio::test]
    async fn unknown_permissions_block_create() {
        let store = store();
        let err = store
            .create_role(NewRole {
                name: "Broken".into(),
                permissions: BTreeSet::from([Uuid::from_u128(77)]),
                ..Default::default()
            })
            .await
            .unwrap_err();

        assert_eq!(err.code(), "INVALID_PERMISSIONS");
        assert!(store.list_roles().await.is_empty());
    }

    #[tokio::test]
    async fn create_with_missing_parent_fails() {
        let store = store();
        let err = store
            .create_role(NewRole {
                name: "Orphan".into(),
                inherits_from: Some(Uuid::from_u128(5)),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn update_role_rejects_cycle_and_keeps_state() {
        let store = store();
        let a = role(&store, "A", &[], None).await;
        let b = role(&store, "B", &[], Some(a.role.id)).await;

        let err = store
            .update_role(
                a.role.id,
                UpdateRole {
                    name: Some("A renamed".into()),
                    inherits_from: Some(Some(b.role.id)),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();

        assert_eq!(err.code(), "CYCLIC_INHERITANCE");
        let a = store.get_role(a.role.id).await.unwrap();
        assert_eq!(a.role.name, "A");
        assert_eq!(a.role.inherits_from, None);
    }

    #[tokio::test]
    async fn clearing_parent_drops_inherited_permissions() {
        let store = store();
        let read = permission(&store, "read").await;
        let write = permission(&store, "write").await;
        let a = role(&store, "A", &[read], None).await;
        let b = role(&store, "B", &[write], Some(a.role.id)).await;
        assert_eq!(b.effective_permissions, BTreeSet::from([read, write]));

        let b = store.set_inheritance(b.role.id, None).await.unwrap();
        assert_eq!(b.effective_permissions, BTreeSet::from([write]));
    }

    #[tokio::test]
    async fn delete_role_with_children_conflicts() {
        let store = store();
        let a = role(&store, "A", &[], None).await;
        let b = role(&store, "B", &[], Some(a.role.id)).await;

        let err = store.delete_role(a.role.id).await.unwrap_err();
        assert_eq!(
            err,
            CoreError::Conflict {
                entity: "role",
                id: a.role.id,
                reasons: vec![ConflictReason::RoleHasChildren {
                    role_ids: vec![b.role.id]
                }],
            }
        );

        store.delete_role(b.role.id).await.unwrap();
        store.delete_role(a.role.id).await.unwrap();
        assert!(store.list_roles().await.is_empty());
    }

    #[tokio::test]
    async fn delete_role_held_by_user_follows_policy() {
        let store = store();
        let viewer = role(&store, "Viewer", &[], None).await;
        let user = store
            .create_user(NewUser {
                email: "user@gmail.com".into(),
                name: "Regular User".into(),
                password: None,
                roles: BTreeSet::from([viewer.role.id]),
                status: None,
                mfa_enabled: false,
            })
            .await
            .unwrap();

        let err = store.delete_role(viewer.role.id).await.unwrap_err();
        match err {
            CoreError::Conflict { reasons, .. } => assert_eq!(
                reasons,
                vec![ConflictReason::RoleAssignedToUsers {
                    user_ids: vec![user.id]
                }]
            ),
            other => panic!("unexpected error: {other:?}"),
        }

        let (detaching, _) = store_with(PolicyConfig {
            role_delete_with_users: RoleDeletePolicy::Detach,
            ..Default::default()
        });
        let viewer = role(&detaching, "Viewer", &[], None).await;
        let user = detaching
            .create_user(NewUser {
                email: "user@gmail.com".into(),
                name: "Regular User".into(),
                password: None,
                roles: BTreeSet::from([viewer.role.id]),
                status: None,
                mfa_enabled: false,
            })
            .await
            .unwrap();

        detaching.delete_role(viewer.role.id).await.unwrap();
        assert!(detaching.get_user(user.id).await.unwrap().roles.is_empty());
    }

    #[tokio::test]
    async fn clone_copies_permissions_and_parent() {
        let store = store();
        let read = permission(&store, "read").await;
        let write = permission(&store, "write").await;
        let manager = role(&store, "Manager", &[read], None).await;
        let lead = role(&store, "Team Lead", &[write], Some(manager.role.id)).await;

        let copy = store.clone_role(lead.role.id).await.unwrap();
        assert_ne!(copy.role.id, lead.role.id);
        assert_eq!(copy.role.name, "Team Lead (Copy)");
        assert_eq!(copy.role.permissions, lead.role.permissions);
        assert_eq!(copy.role.inherits_from, Some(manager.role.id));
        assert_eq!(copy.effective_permissions, BTreeSet::from([read, write]));

        let second = store.clone_role(lead.role.id).await.unwrap();
        assert_eq!(second.role.name, "Team Lead (Copy 2)");

        let err = store.clone_role(Uuid::from_u128(3)).await.unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn clone_of_longest_name_stays_within_bounds() {
        let store = store();
        let long = "R".repeat(MAX_NAME_LEN);
        let original = role(&store, &long, &[], None).await;

        let copy = store.clone_role(original.role.id).await.unwrap();
        assert_eq!(copy.role.name.chars().count(), MAX_NAME_LEN);
        assert!(copy.role.name.ends_with(" (Copy)"));

        let resaved = store
            .update_role(
                copy.role.id,
                UpdateRole {
                    name: Some(copy.role.name.clone()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(resaved.role.name, copy.role.name);

        let second = store.clone_role(original.role.id).await.unwrap();
        assert!(second.role.name.ends_with(" (Copy 2)"));
        assert!(second.role.name.chars().count() <= MAX_NAME_LEN);
    }

    #[tokio::test]
    async fn effective_permission_names_are_sorted() {
        let store = store();
        let write = permission(&store, "user.write").await;
        let read = permission(&store, "user.read").await;
        let a = role(&store, "A", &[write], None).await;
        let b = role(&store, "B", &[read], Some(a.role.id)).await;

        let names = store.effective_permission_names(b.role.id).await.unwrap();
        assert_eq!(names, vec!["user.read", "user.write"]);
    }

    #[tokio::test]
    async fn hierarchy_reflects_store() {
        let store = store();
        let manager = role(&store, "Manager", &[], None).await;
        role(&store, "Team Lead", &[], Some(manager.role.id)).await;
        role(&store, "Super Admin", &[], None).await;

        let forest = store.role_hierarchy().await;
        assert_eq!(forest.len(), 2);
        assert_eq!(forest[0].view.role.name, "Manager");
        assert_eq!(forest[0].children[0].view.role.name, "Team Lead");
    }
}
