use std::collections::HashSet;

use super::Actor;
use super::catalog::ProtectedEntities;
use crate::error::{Error, Result};
use crate::types::{Permission, Role, RoleId, User, UserId};

/// Privilege tier of an actor. `Master` wins over `Admin` when both are held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Master,
    Admin,
    Other,
}

/// Pure policy predicates over an actor and already-loaded targets.
#[derive(Debug, Clone, Default)]
pub struct Policy {
    protected: ProtectedEntities,
}

impl Policy {
    #[must_use]
    pub fn new(protected: ProtectedEntities) -> Self {
        Self { protected }
    }

    #[must_use]
    pub fn protected(&self) -> &ProtectedEntities {
        &self.protected
    }

    #[must_use]
    pub fn tier(&self, actor: &Actor) -> Tier {
        if actor.roles.iter().any(|r| self.protected.master.matches(r)) {
            Tier::Master
        } else if actor.roles.iter().any(|r| self.protected.admin.matches(r)) {
            Tier::Admin
        } else {
            Tier::Other
        }
    }

    #[must_use]
    pub fn can_view_roles(&self, actor: &Actor) -> bool {
        self.tier(actor) != Tier::Other
    }

    #[must_use]
    pub fn can_create_role(&self, actor: &Actor) -> bool {
        self.tier(actor) != Tier::Other
    }

    /// A master may edit any role but their own; an admin additionally may
    /// not touch `master` or `admin`.
    #[must_use]
    pub fn can_update_role(&self, actor: &Actor, role: &Role) -> bool {
        match self.tier(actor) {
            Tier::Master => !actor.holds_role(role),
            Tier::Admin => !self.protected.is_reserved_role(role) && !actor.holds_role(role),
            Tier::Other => false,
        }
    }

    /// Protected ids are never deletable; otherwise as [`Self::can_update_role`].
    #[must_use]
    pub fn can_delete_role(&self, actor: &Actor, role: &Role) -> bool {
        !self.protected.is_protected_role(role.id) && self.can_update_role(actor, role)
    }

    /// Ids of `roles` the actor may delete. An empty result is a validation failure.
    pub fn filter_deletable_roles(&self, actor: &Actor, roles: &[Role]) -> Result<Vec<RoleId>> {
        let ids: Vec<RoleId> = roles
            .iter()
            .filter(|r| self.can_delete_role(actor, r))
            .map(|r| r.id)
            .collect();

        if ids.is_empty() {
            return Err(Error::validation("no deletable roles in selection"));
        }
        Ok(ids)
    }

    pub fn check_user_delete(&self, actor: &Actor, target: UserId) -> Result<()> {
        if self.protected.is_root_user(target) {
            return Err(Error::forbidden("the root user cannot be deleted"));
        }
        if target == actor.id() {
            return Err(Error::forbidden("you cannot delete your own account"));
        }
        Ok(())
    }

    /// Drops duplicates, the root user and the actor from a bulk delete.
    pub fn filter_user_bulk_delete(&self, actor: &Actor, ids: &[UserId]) -> Result<Vec<UserId>> {
        let mut seen = HashSet::with_capacity(ids.len());
        let filtered: Vec<UserId> = ids
            .iter()
            .copied()
            .filter(|id| seen.insert(*id))
            .filter(|id| !self.protected.is_root_user(*id) && *id != actor.id())
            .collect();

        if filtered.is_empty() {
            return Err(Error::validation(
                "no deletable users in selection",
            ));
        }
        Ok(filtered)
    }

    /// The root account can only be edited by itself. Accounts holding a
    /// reserved role are otherwise editable only by a master or by themselves.
    pub fn check_user_update(&self, actor: &Actor, target: &User, target_roles: &[Role]) -> Result<()> {
        if actor.id() == target.id {
            return Ok(());
        }
        if self.protected.is_root_user(target.id) {
            return Err(Error::forbidden("only the root user can edit the root user"));
        }
        if self.tier(actor) != Tier::Master
            && target_roles.iter().any(|r| self.protected.is_reserved_role(r))
        {
            return Err(Error::forbidden("only a master can edit master or admin accounts"));
        }
        Ok(())
    }

    pub fn check_user_verify(&self, target: UserId) -> Result<()> {
        if self.protected.is_root_user(target) {
            return Err(Error::forbidden("the root user cannot be re-verified"));
        }
        Ok(())
    }

    /// Changing which roles hold a permission edits each gained or lost role,
    /// so every one of them must pass [`Self::can_update_role`]. The master
    /// role always holds every permission and is exempt.
    pub fn check_permission_holders(
        &self,
        actor: &Actor,
        current: &[Role],
        requested: &[Role],
    ) -> Result<()> {
        let current_ids: HashSet<RoleId> = current.iter().map(|r| r.id).collect();
        let requested_ids: HashSet<RoleId> = requested.iter().map(|r| r.id).collect();

        let denied = current
            .iter()
            .filter(|r| !requested_ids.contains(&r.id))
            .chain(requested.iter().filter(|r| !current_ids.contains(&r.id)))
            .filter(|r| !self.protected.master.matches(r))
            .find(|r| !self.can_update_role(actor, r));

        match denied {
            Some(role) => Err(Error::forbidden(format!(
                "you cannot change the permissions of the '{}' role",
                role.name
            ))),
            None => Ok(()),
        }
    }

    /// Validates a change of `target`'s role set from `current` to `requested`.
    /// `target` is `None` for a user that does not exist yet.
    pub fn check_role_assignment(
        &self,
        actor: &Actor,
        target: Option<UserId>,
        current: &[Role],
        requested: &[Role],
    ) -> Result<()> {
        let current_ids: HashSet<RoleId> = current.iter().map(|r| r.id).collect();
        let requested_ids: HashSet<RoleId> = requested.iter().map(|r| r.id).collect();

        let changed: Vec<&Role> = current
            .iter()
            .filter(|r| !requested_ids.contains(&r.id))
            .chain(requested.iter().filter(|r| !current_ids.contains(&r.id)))
            .collect();

        if changed.is_empty() {
            return Ok(());
        }
        if target == Some(actor.id()) {
            return Err(Error::forbidden("you cannot change your own roles"));
        }

        match self.tier(actor) {
            Tier::Master => Ok(()),
            Tier::Admin => match changed.iter().find(|r| self.protected.is_reserved_role(r)) {
                Some(role) => Err(Error::forbidden(format!(
                    "only a master can grant or revoke the '{}' role",
                    role.name
                ))),
                None => Ok(()),
            },
            Tier::Other => Err(Error::forbidden("you cannot change role assignments")),
        }
    }

    /// Every direct permission being newly granted must already be held by the actor.
    pub fn check_direct_grants(
        &self,
        actor: &Actor,
        current: &[Permission],
        requested: &[Permission],
    ) -> Result<()> {
        let current_names: HashSet<&str> = current.iter().map(|p| p.name.as_str()).collect();
        let missing = requested
            .iter()
            .filter(|p| !current_names.contains(p.name.as_str()))
            .find(|p| !actor.can(&p.name));

        match missing {
            Some(p) => Err(Error::forbidden(format!(
                "you cannot grant '{}' without holding it",
                p.name
            ))),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rbac::test_support::*;
    use chrono::Utc;

    fn policy() -> Policy {
        Policy::default()
    }

    fn perm(name: &str) -> Permission {
        Permission {
            id: 0,
            name: name.to_string(),
            guard_name: "web".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_tier_precedence() {
        let p = policy();
        assert_eq!(p.tier(&actor(9, vec![admin(), master()], &[])), Tier::Master);
        assert_eq!(p.tier(&actor(9, vec![admin()], &[])), Tier::Admin);
        assert_eq!(p.tier(&actor(9, vec![member()], &[])), Tier::Other);
        assert_eq!(p.tier(&actor(9, vec![], &[])), Tier::Other);
    }

    #[test]
    fn test_view_and_create_roles() {
        let p = policy();
        assert!(p.can_view_roles(&actor(9, vec![admin()], &[])));
        assert!(p.can_create_role(&actor(9, vec![master()], &[])));
        assert!(!p.can_view_roles(&actor(9, vec![member()], &[])));
        assert!(!p.can_create_role(&actor(9, vec![member()], &[])));
    }

    #[test]
    fn test_protected_roles_undeletable_by_anyone() {
        let p = policy();
        let actors = [
            actor(9, vec![master()], &[]),
            actor(9, vec![admin()], &[]),
            actor(9, vec![member()], &[]),
            actor(1, vec![master(), admin()], &[]),
        ];
        let protected = [
            master(),
            admin(),
            member(),
            role(3, "renamed-member"),
        ];
        for a in &actors {
            for r in &protected {
                assert!(!p.can_delete_role(a, r), "role {} deletable", r.id);
            }
        }
    }

    #[test]
    fn test_master_cannot_edit_own_role() {
        let p = policy();
        let u = actor(1, vec![master()], &[]);

        assert!(!p.can_update_role(&u, &master()));
        assert!(p.can_update_role(&u, &admin()));
        assert!(!p.can_delete_role(&u, &admin()));
        assert!(p.can_update_role(&u, &role(7, "editor")));
        assert!(p.can_delete_role(&u, &role(7, "editor")));
    }

    #[test]
    fn test_admin_cannot_escalate() {
        let p = policy();
        let a = actor(4, vec![admin()], &[]);

        assert!(!p.can_update_role(&a, &master()));
        assert!(!p.can_update_role(&a, &admin()));
        // Reserved by name even under another id.
        assert!(!p.can_update_role(&a, &role(12, "master")));
        assert!(p.can_update_role(&a, &member()));
        assert!(p.can_update_role(&a, &role(7, "editor")));
    }

    #[test]
    fn test_admin_cannot_edit_own_custom_role() {
        let p = policy();
        let editor = role(7, "editor");
        let a = actor(4, vec![admin(), editor.clone()], &[]);
        assert!(!p.can_update_role(&a, &editor));
        assert!(!p.can_delete_role(&a, &editor));
    }

    #[test]
    fn test_others_cannot_touch_roles() {
        let p = policy();
        let u = actor(4, vec![member()], &["roles.manage"]);
        assert!(!p.can_update_role(&u, &role(7, "editor")));
        assert!(!p.can_delete_role(&u, &role(7, "editor")));
    }

    #[test]
    fn test_filter_deletable_roles() {
        let p = policy();
        let a = actor(1, vec![master()], &[]);
        let ids = p
            .filter_deletable_roles(&a, &[master(), role(7, "editor"), member(), role(8, "x")])
            .unwrap();
        assert_eq!(ids, [7, 8]);

        let result = p.filter_deletable_roles(&a, &[master(), admin()]);
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn test_user_delete_guards() {
        let p = policy();
        let a = actor(5, vec![master()], &[]);
        assert!(matches!(p.check_user_delete(&a, 1), Err(Error::Forbidden(_))));
        assert!(matches!(p.check_user_delete(&a, 5), Err(Error::Forbidden(_))));
        assert!(p.check_user_delete(&a, 9).is_ok());
    }

    #[test]
    fn test_bulk_delete_excludes_root_and_self() {
        let p = policy();
        let a = actor(7, vec![master()], &[]);

        assert_eq!(p.filter_user_bulk_delete(&a, &[1, 5, 7, 9]).unwrap(), [5, 9]);
        assert_eq!(p.filter_user_bulk_delete(&a, &[5, 5, 9]).unwrap(), [5, 9]);

        let result = p.filter_user_bulk_delete(&a, &[1, 7]);
        assert!(matches!(result, Err(Error::Validation(_))));
        assert!(matches!(
            p.filter_user_bulk_delete(&a, &[]),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_root_editable_only_by_itself() {
        let p = policy();
        let root = actor(1, vec![master()], &[]);
        let other = actor(2, vec![master()], &[]);
        assert!(p.check_user_update(&root, &root.user, &root.roles).is_ok());
        assert!(matches!(
            p.check_user_update(&other, &root.user, &root.roles),
            Err(Error::Forbidden(_))
        ));
        assert!(p.check_user_update(&root, &other.user, &other.roles).is_ok());

        assert!(matches!(p.check_user_verify(1), Err(Error::Forbidden(_))));
        assert!(p.check_user_verify(2).is_ok());
    }

    #[test]
    fn test_admin_cannot_edit_reserved_accounts() {
        let p = policy();
        let a = actor(3, vec![admin()], &[]);
        let second_master = actor(5, vec![master()], &[]);
        let other_admin = actor(6, vec![admin()], &[]);
        let plain = actor(7, vec![member()], &[]);

        assert!(matches!(
            p.check_user_update(&a, &second_master.user, &second_master.roles),
            Err(Error::Forbidden(_))
        ));
        assert!(matches!(
            p.check_user_update(&a, &other_admin.user, &other_admin.roles),
            Err(Error::Forbidden(_))
        ));
        assert!(p.check_user_update(&a, &plain.user, &plain.roles).is_ok());
        assert!(p.check_user_update(&a, &a.user, &a.roles).is_ok());

        let m = actor(2, vec![master()], &[]);
        assert!(p.check_user_update(&m, &other_admin.user, &other_admin.roles).is_ok());
    }

    #[test]
    fn test_permission_holder_changes_follow_role_policy() {
        let p = policy();
        let a = actor(3, vec![admin()], &[]);
        let m = actor(2, vec![master()], &[]);
        let editor = role(7, "editor");

        assert!(p.check_permission_holders(&a, &[master()], &[master(), editor.clone()]).is_ok());
        assert!(matches!(
            p.check_permission_holders(&a, &[master()], &[master(), admin()]),
            Err(Error::Forbidden(_))
        ));
        assert!(matches!(
            p.check_permission_holders(&a, &[master(), admin()], &[master()]),
            Err(Error::Forbidden(_))
        ));
        // Unchanged reserved holders are not edits.
        assert!(p
            .check_permission_holders(&a, &[master(), admin()], &[master(), admin(), editor])
            .is_ok());

        assert!(p.check_permission_holders(&m, &[master()], &[master(), admin()]).is_ok());
        assert!(matches!(
            p.check_permission_holders(&actor(4, vec![member()], &[]), &[], &[member()]),
            Err(Error::Forbidden(_))
        ));
    }

    #[test]
    fn test_role_assignment_rules() {
        let p = policy();
        let m = actor(2, vec![master()], &[]);
        let a = actor(3, vec![admin()], &[]);
        let u = actor(4, vec![member()], &[]);
        let editor = role(7, "editor");

        // Unchanged sets are always fine, even for self.
        assert!(p.check_role_assignment(&u, Some(4), &[member()], &[member()]).is_ok());

        assert!(p.check_role_assignment(&m, Some(9), &[], &[admin()]).is_ok());
        assert!(p.check_role_assignment(&m, None, &[], &[master()]).is_ok());
        assert!(matches!(
            p.check_role_assignment(&m, Some(2), &[master()], &[]),
            Err(Error::Forbidden(_))
        ));

        assert!(p.check_role_assignment(&a, Some(9), &[member()], &[editor.clone()]).is_ok());
        assert!(matches!(
            p.check_role_assignment(&a, Some(9), &[], &[admin()]),
            Err(Error::Forbidden(_))
        ));
        assert!(matches!(
            p.check_role_assignment(&a, Some(9), &[master()], &[]),
            Err(Error::Forbidden(_))
        ));

        assert!(matches!(
            p.check_role_assignment(&u, Some(9), &[], &[editor]),
            Err(Error::Forbidden(_))
        ));
    }

    #[test]
    fn test_direct_grants_must_be_held() {
        let p = policy();
        let a = actor(3, vec![admin()], &["notes.view"]);

        assert!(p.check_direct_grants(&a, &[], &[perm("notes.view")]).is_ok());
        assert!(matches!(
            p.check_direct_grants(&a, &[], &[perm("roles.manage")]),
            Err(Error::Forbidden(_))
        ));
        // Keeping an existing grant the actor lacks is not a new grant.
        assert!(p
            .check_direct_grants(&a, &[perm("roles.manage")], &[perm("roles.manage")])
            .is_ok());
        // Revoking is always allowed.
        assert!(p.check_direct_grants(&a, &[perm("roles.manage")], &[]).is_ok());
    }
}
