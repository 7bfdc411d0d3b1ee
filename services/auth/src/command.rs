//! Administrative commands
//!
//! Every administrative mutation has a variant here carrying its typed
//! input. [`RbacCore::execute`] is the single dispatch point and records
//! each successful command in the activity log.

use common::CoreResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;
use uuid::Uuid;

use crate::RbacCore;
use crate::activity::ActivityKind;
use crate::models::{
    NewPermission, NewRole, NewUser, Permission, RoleView, UpdatePermission, UpdateRole,
    UpdateUser, User, UserStatus,
};

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AdminCommand {
    CreateUser(NewUser),
    UpdateUser { id: Uuid, changes: UpdateUser },
    DeleteUser { id: Uuid },
    SetUserStatus { id: Uuid, status: UserStatus },
    BulkUpdateStatus { ids: Vec<Uuid>, status: UserStatus },
    AssignRole { user_id: Uuid, role_id: Uuid },
    BulkAssignRole { user_ids: Vec<Uuid>, role_id: Uuid },
    RemoveRole { user_id: Uuid, role_id: Uuid },
    CreateRole(NewRole),
    UpdateRole { id: Uuid, changes: UpdateRole },
    DeleteRole { id: Uuid },
    SetInheritance { role_id: Uuid, parent_id: Option<Uuid> },
    AssignPermissions { role_id: Uuid, permission_ids: BTreeSet<Uuid> },
    CloneRole { id: Uuid },
    CreatePermission(NewPermission),
    UpdatePermission { id: Uuid, changes: UpdatePermission },
    DeletePermission { id: Uuid },
}

impl AdminCommand {
    fn kind(&self) -> ActivityKind {
        match self {
            AdminCommand::CreateUser(_) => ActivityKind::UserCreated,
            AdminCommand::UpdateUser { .. }
            | AdminCommand::SetUserStatus { .. }
            | AdminCommand::BulkUpdateStatus { .. }
            | AdminCommand::RemoveRole { .. } => ActivityKind::UserUpdated,
            AdminCommand::DeleteUser { .. } => ActivityKind::UserDeleted,
            AdminCommand::AssignRole { .. } | AdminCommand::BulkAssignRole { .. } => {
                ActivityKind::RoleAssigned
            }
            AdminCommand::CreateRole(_) | AdminCommand::CloneRole { .. } => {
                ActivityKind::RoleCreated
            }
            AdminCommand::UpdateRole { .. } | AdminCommand::SetInheritance { .. } => {
                ActivityKind::RoleUpdated
            }
            AdminCommand::DeleteRole { .. } => ActivityKind::RoleDeleted,
            AdminCommand::AssignPermissions { .. } => ActivityKind::PermissionGranted,
            AdminCommand::CreatePermission(_) => ActivityKind::PermissionCreated,
            AdminCommand::UpdatePermission { .. } => ActivityKind::PermissionUpdated,
            AdminCommand::DeletePermission { .. } => ActivityKind::PermissionDeleted,
        }
    }
}

/// Typed result of an [`AdminCommand`]
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum AdminOutcome {
    User(User),
    Role(RoleView),
    Permission(Permission),
    Updated { updated: usize },
    Deleted { id: Uuid },
}

impl AdminOutcome {
    /// User the outcome is about, for the activity log
    fn user_id(&self) -> Option<Uuid> {
        match self {
            AdminOutcome::User(user) => Some(user.id),
            _ => None,
        }
    }

    fn describe(&self) -> String {
        match self {
            AdminOutcome::User(user) => user.email.clone(),
            AdminOutcome::Role(view) => view.role.name.clone(),
            AdminOutcome::Permission(permission) => permission.name.clone(),
            AdminOutcome::Updated { updated } => format!("{} record(s)", updated),
            AdminOutcome::Deleted { id } => id.to_string(),
        }
    }
}

impl RbacCore {
    /// Run one administrative command
    pub async fn execute(&self, command: AdminCommand) -> CoreResult<AdminOutcome> {
        let kind = command.kind();
        debug!("Executing admin command: {:?}", kind);

        let store = self.store();
        let outcome = match command {
            AdminCommand::CreateUser(new_user) => AdminOutcome::User(store.create_user(new_user).await?),
            AdminCommand::UpdateUser { id, changes } => {
                let user = store.update_user(id, changes).await?;
                self.end_sessions_if_inactive(&[user.id], user.status).await;
                AdminOutcome::User(user)
            }
            AdminCommand::DeleteUser { id } => {
                self.delete_user(id).await?;
                AdminOutcome::Deleted { id }
            }
            AdminCommand::SetUserStatus { id, status } => {
                let user = store.update_user_status(id, status).await?;
                self.end_sessions_if_inactive(&[id], status).await;
                AdminOutcome::User(user)
            }
            AdminCommand::BulkUpdateStatus { ids, status } => {
                let updated = store.bulk_update_status(&ids, status).await;
                self.end_sessions_if_inactive(&ids, status).await;
                AdminOutcome::Updated { updated }
            }
            AdminCommand::AssignRole { user_id, role_id } => {
                AdminOutcome::User(store.assign_role(user_id, role_id).await?)
            }
            AdminCommand::BulkAssignRole { user_ids, role_id } => AdminOutcome::Updated {
                updated: store.bulk_assign_role(&user_ids, role_id).await?,
            },
            AdminCommand::RemoveRole { user_id, role_id } => {
                AdminOutcome::User(store.remove_role(user_id, role_id).await?)
            }
            AdminCommand::CreateRole(new_role) => AdminOutcome::Role(store.create_role(new_role).await?),
            AdminCommand::UpdateRole { id, changes } => {
                AdminOutcome::Role(store.update_role(id, changes).await?)
            }
            AdminCommand::DeleteRole { id } => {
                store.delete_role(id).await?;
                AdminOutcome::Deleted { id }
            }
            AdminCommand::SetInheritance { role_id, parent_id } => {
                AdminOutcome::Role(store.set_inheritance(role_id, parent_id).await?)
            }
            AdminCommand::AssignPermissions {
                role_id,
                permission_ids,
            } => AdminOutcome::Role(store.assign_permissions(role_id, permission_ids).await?),
            AdminCommand::CloneRole { id } => AdminOutcome::Role(store.clone_role(id).await?),
            AdminCommand::CreatePermission(new_permission) => {
                AdminOutcome::Permission(store.create_permission(new_permission).await?)
            }
            AdminCommand::UpdatePermission { id, changes } => {
                AdminOutcome::Permission(store.update_permission(id, changes).await?)
            }
            AdminCommand::DeletePermission { id } => {
                store.delete_permission(id).await?;
                AdminOutcome::Deleted { id }
            }
        };

        self.activity()
            .record(outcome.user_id(), kind, outcome.describe())
            .await;
        Ok(outcome)
    }
}
