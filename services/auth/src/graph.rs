//! Role graph resolution
//!
//! Roles form a forest through their single `inherits_from` edge. This
//! module only reads roles: it computes effective permissions, validates
//! proposed inheritance edges before they are committed, and builds the
//! hierarchy view. Every walk carries its own guard set so corrupt data
//! can never make it loop.

use common::{CoreError, CoreResult};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::warn;
use uuid::Uuid;

use crate::models::{Role, RoleNode, RoleView};

/// Read access to roles by id
pub trait RoleLookup {
    fn role(&self, id: Uuid) -> Option<&Role>;

    fn all_roles(&self) -> Vec<&Role>;
}

impl RoleLookup for HashMap<Uuid, Role> {
    fn role(&self, id: Uuid) -> Option<&Role> {
        self.get(&id)
    }

    fn all_roles(&self) -> Vec<&Role> {
        self.values().collect()
    }
}

/// Union of the direct permissions of `role_id` and of every ancestor
///
/// Fails with `NotFound` if the role is unknown and with
/// `CyclicInheritance` if the walk revisits a role.
pub fn effective_permissions<L>(roles: &L, role_id: Uuid) -> CoreResult<BTreeSet<Uuid>>
where
    L: RoleLookup + ?Sized,
{
    if roles.role(role_id).is_none() {
        return Err(CoreError::not_found("role", role_id));
    }

    let mut visited = HashSet::new();
    let mut permissions = BTreeSet::new();
    let mut current = Some(role_id);

    while let Some(id) = current {
        if !visited.insert(id) {
            return Err(CoreError::CyclicInheritance { role_id });
        }
        match roles.role(id) {
            Some(role) => {
                permissions.extend(role.permissions.iter().copied());
                current = role.inherits_from;
            }
            None => break,
        }
    }

    Ok(permissions)
}

/// Effective permissions for display; a corrupt chain yields an empty set
pub fn effective_permissions_lenient<L>(roles: &L, role_id: Uuid) -> BTreeSet<Uuid>
where
    L: RoleLookup + ?Sized,
{
    match effective_permissions(roles, role_id) {
        Ok(permissions) => permissions,
        Err(e) => {
            warn!("Returning no effective permissions for role {}: {}", role_id, e);
            BTreeSet::new()
        }
    }
}

/// Build the view returned to callers
pub fn view<L>(roles: &L, role: &Role) -> RoleView
where
    L: RoleLookup + ?Sized,
{
    RoleView {
        effective_permissions: effective_permissions_lenient(roles, role.id),
        role: role.clone(),
    }
}

/// Check that `role_id -> parent_id` cannot complete a cycle
///
/// `role_id` does not need to exist yet, which lets role creation
/// validate its parent before the insert.
pub fn check_inheritance<L>(roles: &L, role_id: Uuid, parent_id: Option<Uuid>) -> CoreResult<()>
where
    L: RoleLookup + ?Sized,
{
    let Some(parent_id) = parent_id else {
        return Ok(());
    };

    if parent_id == role_id {
        warn!("Rejected self-inheritance for role {}", role_id);
        return Err(CoreError::CyclicInheritance { role_id });
    }

    if roles.role(parent_id).is_none() {
        return Err(CoreError::not_found("role", parent_id));
    }

    let mut visited = HashSet::from([role_id]);
    let mut current = Some(parent_id);

    while let Some(id) = current {
        if !visited.insert(id) {
            warn!(
                "Rejected inheritance {} -> {}: cycle through {}",
                role_id, parent_id, id
            );
            return Err(CoreError::CyclicInheritance { role_id });
        }
        current = roles.role(id).and_then(|role| role.inherits_from);
    }

    Ok(())
}

/// Ids on the parent chain starting at (and including) `start`
///
/// Stops quietly at a missing role or a repeated id; callers that need
/// a verdict on the chain use [`check_inheritance`].
pub fn chain<L>(roles: &L, start: Uuid) -> Vec<Uuid>
where
    L: RoleLookup + ?Sized,
{
    let mut visited = HashSet::new();
    let mut ids = Vec::new();
    let mut current = Some(start);

    while let Some(id) = current {
        if !visited.insert(id) {
            break;
        }
        ids.push(id);
        current = roles.role(id).and_then(|role| role.inherits_from);
    }

    ids
}

/// Forest view of the inheritance relation
///
/// Roots are roles without a parent (or whose parent no longer
/// exists). Each branch gets its own copy of the visited set so that
/// sibling subtrees never look cyclic to each other.
pub fn hierarchy<L>(roles: &L) -> Vec<RoleNode>
where
    L: RoleLookup + ?Sized,
{
    let all = roles.all_roles();
    let mut children: HashMap<Option<Uuid>, Vec<&Role>> = HashMap::new();

    for role in all.iter().copied() {
        let parent = role
            .inherits_from
            .filter(|parent| roles.role(*parent).is_some());
        children.entry(parent).or_default().push(role);
    }

    for siblings in children.values_mut() {
        siblings.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.name.cmp(&b.name)));
    }

    children
        .get(&None)
        .map(|roots| {
            roots
                .iter()
                .filter_map(|root| build_node(roles, &children, root, HashSet::new()))
                .collect()
        })
        .unwrap_or_default()
}

fn build_node<L>(
    roles: &L,
    children: &HashMap<Option<Uuid>, Vec<&Role>>,
    role: &Role,
    mut visited: HashSet<Uuid>,
) -> Option<RoleNode>
where
    L: RoleLookup + ?Sized,
{
    if !visited.insert(role.id) {
        warn!("Cycle reached role {} while building hierarchy", role.id);
        return None;
    }

    let nodes = children
        .get(&Some(role.id))
        .map(|kids| {
            kids.iter()
                .filter_map(|child| build_node(roles, children, child, visited.clone()))
                .collect()
        })
        .unwrap_or_default();

    Some(RoleNode {
        view: view(roles, role),
        children: nodes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn role(n: u128, parent: Option<u128>, perms: &[u128]) -> Role {
        let now = Utc::now() + Duration::seconds(n as i64);
        Role {
            id: Uuid::from_u128(n),
            name: format!("role-{}", n),
            description: String::new(),
            permissions: perms.iter().map(|p| Uuid::from_u128(1000 + p)).collect(),
            inherits_from: parent.map(Uuid::from_u128),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn table(roles: Vec<Role>) -> HashMap<Uuid, Role> {
        roles.into_iter().map(|r| (r.id, r)).collect()
    }

    fn perm(n: u128) -> Uuid {
        Uuid::from_u128(1000 + n)
    }

    #[test]
    fn effective_permissions_is_union_of_chain() {
        let roles = table(vec![
            role(1, None, &[1]),
            role(2, Some(1), &[2]),
            role(3, Some(2), &[2, 3]),
        ]);

        let effective = effective_permissions(&roles, Uuid::from_u128(3)).unwrap();
        assert_eq!(effective, BTreeSet::from([perm(1), perm(2), perm(3)]));

        let root = effective_permissions(&roles, Uuid::from_u128(1)).unwrap();
        assert_eq!(root, BTreeSet::from([perm(1)]));
    }

    #[test]
    fn effective_permissions_detects_corrupt_cycle() {
        let roles = table(vec![role(1, Some(2), &[1]), role(2, Some(1), &[2])]);

        let err = effective_permissions(&roles, Uuid::from_u128(1)).unwrap_err();
        assert_eq!(err, CoreError::CyclicInheritance { role_id: Uuid::from_u128(1) });
        assert!(effective_permissions_lenient(&roles, Uuid::from_u128(1)).is_empty());
    }

    #[test]
    fn unknown_role_is_not_found() {
        let roles = table(vec![]);
        let err = effective_permissions(&roles, Uuid::from_u128(9)).unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[test]
    fn check_inheritance_rejects_self_and_descendants() {
        let roles = table(vec![
            role(1, None, &[]),
            role(2, Some(1), &[]),
            role(3, Some(2), &[]),
        ]);
        let a = Uuid::from_u128(1);

        assert!(check_inheritance(&roles, a, Some(a)).is_err());
        assert!(check_inheritance(&roles, a, Some(Uuid::from_u128(2))).is_err());
        assert!(check_inheritance(&roles, a, Some(Uuid::from_u128(3))).is_err());
        assert!(check_inheritance(&roles, Uuid::from_u128(3), Some(a)).is_ok());
        assert!(check_inheritance(&roles, a, None).is_ok());
    }

    #[test]
    fn check_inheritance_requires_existing_parent() {
        let roles = table(vec![role(1, None, &[])]);
        let err = check_inheritance(&roles, Uuid::from_u128(1), Some(Uuid::from_u128(7)))
            .unwrap_err();
        assert_eq!(err, CoreError::not_found("role", Uuid::from_u128(7)));
    }

    #[test]
    fn check_inheritance_terminates_on_existing_cycle() {
        let roles = table(vec![role(1, Some(2), &[]), role(2, Some(1), &[]), role(3, None, &[])]);
        let err = check_inheritance(&roles, Uuid::from_u128(3), Some(Uuid::from_u128(1)))
            .unwrap_err();
        assert_eq!(err.code(), "CYCLIC_INHERITANCE");
    }

    #[test]
    fn chain_lists_parent_path() {
        let roles = table(vec![
            role(1, None, &[]),
            role(2, Some(1), &[]),
            role(3, Some(2), &[]),
        ]);
        assert_eq!(
            chain(&roles, Uuid::from_u128(3)),
            vec![Uuid::from_u128(3), Uuid::from_u128(2), Uuid::from_u128(1)]
        );
    }

    #[test]
    fn hierarchy_builds_forest_with_shared_ancestors() {
        let roles = table(vec![
            role(1, None, &[1]),
            role(2, Some(1), &[2]),
            role(3, Some(1), &[3]),
            role(4, Some(3), &[4]),
            role(5, None, &[5]),
        ]);

        let forest = hierarchy(&roles);
        assert_eq!(forest.len(), 2);

        let root = &forest[0];
        assert_eq!(root.view.role.id, Uuid::from_u128(1));
        assert_eq!(root.children.len(), 2);
        assert_eq!(root.children[1].children.len(), 1);

        let leaf = &root.children[1].children[0];
        assert_eq!(
            leaf.view.effective_permissions,
            BTreeSet::from([perm(1), perm(3), perm(4)])
        );
    }

    #[test]
    fn hierarchy_skips_roles_stuck_in_a_cycle() {
        let roles = table(vec![role(1, Some(2), &[]), role(2, Some(1), &[]), role(3, None, &[])]);
        let forest = hierarchy(&roles);
        assert_eq!(forest.len(), 1);
        assert_eq!(forest[0].view.role.id, Uuid::from_u128(3));
    }
}
