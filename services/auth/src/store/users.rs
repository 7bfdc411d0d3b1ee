//! User operations

use common::{CoreError, CoreResult};
use std::collections::BTreeSet;
use tracing::info;
use uuid::Uuid;

use super::{EntityStore, KeyIndex};
use crate::graph;
use crate::models::{NewUser, UpdateUser, User, UserStatus};
use crate::password::hash_password;
use crate::validation::{validate_email, validate_name, validate_password};

impl EntityStore {
    /// Create a new user
    pub async fn create_user(&self, new_user: NewUser) -> CoreResult<User> {
        info!("Creating new user: {}", new_user.email);

        validate_email(new_user.email.trim()).map_err(CoreError::Validation)?;
        validate_name("Name", &new_user.name).map_err(CoreError::Validation)?;
        // Hash before taking the write guard; Argon2 is deliberately slow
        let password_hash = match new_user.password.as_deref() {
            Some(password) => {
                validate_password(password).map_err(CoreError::Validation)?;
                Some(hash_password(password)?)
            }
            None => None,
        };

        let mut tables = self.tables.write().await;
        tables.ensure_unique(KeyIndex::UserEmail, &new_user.email, None)?;
        tables.validate_roles(&new_user.roles)?;

        let now = self.clock.now();
        let user = User {
            id: self.ids.entity_id(),
            email: new_user.email.trim().to_string(),
            name: new_user.name.trim().to_string(),
            status: new_user.status.unwrap_or(UserStatus::Active),
            roles: new_user.roles,
            password_hash,
            mfa_enabled: new_user.mfa_enabled,
            last_login: None,
            created_at: now,
            updated_at: now,
        };

        tables.reindex(KeyIndex::UserEmail, None, &user.email, user.id);
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    /// Find a user by ID
    pub async fn get_user(&self, id: Uuid) -> CoreResult<User> {
        self.tables
            .read()
            .await
            .users
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("user", id))
    }

    /// Find a user by email, ignoring case
    pub async fn find_user_by_email(&self, email: &str) -> Option<User> {
        let tables = self.tables.read().await;
        tables
            .lookup(KeyIndex::UserEmail, email)
            .and_then(|id| tables.users.get(&id))
            .cloned()
    }

    /// All users, oldest first
    pub async fn list_users(&self) -> Vec<User> {
        let tables = self.tables.read().await;
        let mut users: Vec<User> = tables.users.values().cloned().collect();
        users.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.email.cmp(&b.email)));
        users
    }

    /// Apply a partial update
    pub async fn update_user(&self, id: Uuid, changes: UpdateUser) -> CoreResult<User> {
        info!("Updating user: {}", id);

        if let Some(email) = changes.email.as_deref() {
            validate_email(email.trim()).map_err(CoreError::Validation)?;
        }
        if let Some(name) = changes.name.as_deref() {
            validate_name("Name", name).map_err(CoreError::Validation)?;
        }
        let password_hash = match changes.password.as_deref() {
            Some(password) => {
                validate_password(password).map_err(CoreError::Validation)?;
                Some(hash_password(password)?)
            }
            None => None,
        };

        let mut tables = self.tables.write().await;
        let current = tables
            .users
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("user", id))?;

        if let Some(email) = changes.email.as_deref() {
            tables.ensure_unique(KeyIndex::UserEmail, email, Some(id))?;
        }
        if let Some(roles) = changes.roles.as_ref() {
            tables.validate_roles(roles)?;
        }

        let mut user = current.clone();
        if let Some(email) = changes.email {
            user.email = email.trim().to_string();
        }
        if let Some(name) = changes.name {
            user.name = name.trim().to_string();
        }
        if let Some(status) = changes.status {
            user.status = status;
        }
        if let Some(roles) = changes.roles {
            user.roles = roles;
        }
        if let Some(mfa_enabled) = changes.mfa_enabled {
            user.mfa_enabled = mfa_enabled;
        }
        if password_hash.is_some() {
            user.password_hash = password_hash;
        }
        user.updated_at = self.clock.now();

        if user.email != current.email {
            tables.reindex(KeyIndex::UserEmail, Some(&current.email), &user.email, id);
        }
        tables.users.insert(id, user.clone());
        Ok(user)
    }

    /// Remove a user
    ///
    /// Nothing references users, so removal never conflicts. Ending the
    /// user's sessions is the caller's job (see `RbacCore::delete_user`).
    pub async fn delete_user(&self, id: Uuid) -> CoreResult<User> {
        info!("Deleting user: {}", id);

        let mut tables = self.tables.write().await;
        let user = tables
            .users
            .remove(&id)
            .ok_or_else(|| CoreError::not_found("user", id))?;
        tables.unindex(KeyIndex::UserEmail, &user.email);
        Ok(user)
    }

    pub async fn update_user_status(&self, id: Uuid, status: UserStatus) -> CoreResult<User> {
        self.update_user(
            id,
            UpdateUser {
                status: Some(status),
                ..Default::default()
            },
        )
        .await
    }

    /// Set the status of every listed user; unknown ids are skipped
    pub async fn bulk_update_status(&self, ids: &[Uuid], status: UserStatus) -> usize {
        info!("Bulk status update of {} user(s) to {:?}", ids.len(), status);

        let mut tables = self.tables.write().await;
        let now = self.clock.now();
        let mut updated = 0;
        for id in ids {
            if let Some(user) = tables.users.get_mut(id) {
                user.status = status;
                user.updated_at = now;
                updated += 1;
            }
        }
        updated
    }

    /// Add a role to a user
    pub async fn assign_role(&self, user_id: Uuid, role_id: Uuid) -> CoreResult<User> {
        info!("Assigning role {} to user {}", role_id, user_id);

        let mut tables = self.tables.write().await;
        tables.validate_roles([&role_id])?;
        let now = self.clock.now();
        let user = tables
            .users
            .get_mut(&user_id)
            .ok_or_else(|| CoreError::not_found("user", user_id))?;
        user.roles.insert(role_id);
        user.updated_at = now;
        Ok(user.clone())
    }

    /// Add a role to every listed user; unknown users are skipped
    pub async fn bulk_assign_role(&self, user_ids: &[Uuid], role_id: Uuid) -> CoreResult<usize> {
        info!("Bulk assigning role {} to {} user(s)", role_id, user_ids.len());

        let mut tables = self.tables.write().await;
        tables.validate_roles([&role_id])?;
        let now = self.clock.now();
        let mut updated = 0;
        for id in user_ids {
            if let Some(user) = tables.users.get_mut(id) {
                user.roles.insert(role_id);
                user.updated_at = now;
                updated += 1;
            }
        }
        Ok(updated)
    }

    /// Remove a role from a user; removing a role the user lacks is a no-op
    pub async fn remove_role(&self, user_id: Uuid, role_id: Uuid) -> CoreResult<User> {
        let mut tables = self.tables.write().await;
        let now = self.clock.now();
        let user = tables
            .users
            .get_mut(&user_id)
            .ok_or_else(|| CoreError::not_found("user", user_id))?;
        if user.roles.remove(&role_id) {
            user.updated_at = now;
        }
        Ok(user.clone())
    }

    /// Stamp the last successful sign-in
    pub async fn record_login(&self, user_id: Uuid) -> CoreResult<User> {
        let mut tables = self.tables.write().await;
        let now = self.clock.now();
        let user = tables
            .users
            .get_mut(&user_id)
            .ok_or_else(|| CoreError::not_found("user", user_id))?;
        user.last_login = Some(now);
        Ok(user.clone())
    }

    /// Union of the effective permissions of every role the user holds
    pub async fn user_effective_permissions(&self, user_id: Uuid) -> CoreResult<BTreeSet<Uuid>> {
        let tables = self.tables.read().await;
        let user = tables
            .users
            .get(&user_id)
            .ok_or_else(|| CoreError::not_found("user", user_id))?;

        let mut permissions = BTreeSet::new();
        for role_id in &user.roles {
            permissions.extend(graph::effective_permissions(&tables.roles, *role_id)?);
        }
        Ok(permissions)
    }
}
