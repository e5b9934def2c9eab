use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use super::catalog::ProtectedEntities;
use super::policy::Policy;
use super::{Actor, EffectivePermissions};
use crate::error::{Error, Result};
use crate::store::{PermissionHolders, Store, UserAssignments, UserChange};
use crate::types::{NewUser, Permission, PermissionId, Role, RoleId, User, UserId};

/// A user's assignments as seen by administrators.
#[derive(Debug, Clone, Serialize)]
pub struct UserAccess {
    pub roles: Vec<Role>,
    pub direct_permissions: Vec<Permission>,
    pub role_permissions: Vec<Permission>,
    pub effective_permissions: EffectivePermissions,
}

/// Applies [`Policy`] to current store state. Nothing is cached: every call
/// reads the assignment graph afresh.
pub struct Authorizer {
    store: Arc<dyn Store>,
    policy: Policy,
    guard: String,
}

impl Authorizer {
    pub fn new(store: Arc<dyn Store>, protected: ProtectedEntities, guard: impl Into<String>) -> Self {
        Self {
            store,
            policy: Policy::new(protected),
            guard: guard.into(),
        }
    }

    #[must_use]
    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    #[must_use]
    pub fn guard(&self) -> &str {
        &self.guard
    }

    fn in_guard<T>(&self, items: Vec<T>, guard_of: impl Fn(&T) -> &str) -> Vec<T> {
        items
            .into_iter()
            .filter(|item| guard_of(item) == self.guard)
            .collect()
    }

    fn roles_of(&self, user_id: UserId) -> Result<Vec<Role>> {
        Ok(self.in_guard(self.store.user_roles(user_id)?, |r| r.guard_name.as_str()))
    }

    pub fn user_access(&self, user: &User) -> Result<UserAccess> {
        let roles = self.roles_of(user.id)?;
        let direct = self.in_guard(self.store.user_direct_permissions(user.id)?, |p| {
            p.guard_name.as_str()
        });
        let via_roles = self.in_guard(self.store.user_role_permissions(user.id)?, |p| {
            p.guard_name.as_str()
        });
        let effective = EffectivePermissions::compute(&direct, &via_roles);

        Ok(UserAccess {
            roles,
            direct_permissions: direct,
            role_permissions: via_roles,
            effective_permissions: effective,
        })
    }

    /// Direct grants united with every permission of every role the user holds.
    pub fn effective_permissions(&self, user: &User) -> Result<EffectivePermissions> {
        Ok(self.user_access(user)?.effective_permissions)
    }

    pub fn has_permission(&self, user: &User, name: &str) -> Result<bool> {
        Ok(self.effective_permissions(user)?.contains(name))
    }

    /// Snapshots `user` as the acting user of one operation.
    pub fn actor(&self, user: User) -> Result<Actor> {
        let access = self.user_access(&user)?;
        Ok(Actor {
            user,
            roles: access.roles,
            permissions: access.effective_permissions,
        })
    }

    fn deny(&self, actor: &Actor, action: &str, target: i64, reason: &str) -> Error {
        tracing::debug!(
            "Denied {} on {} to user {}: {}",
            action,
            target,
            actor.id(),
            reason
        );
        Error::forbidden(reason)
    }

    /// Loads roles for an assignment list. Unknown ids are a validation failure.
    fn requested_roles(&self, ids: &[RoleId]) -> Result<Vec<Role>> {
        ids.iter()
            .map(|&id| {
                self.store
                    .get_role(id)?
                    .ok_or_else(|| Error::validation(format!("unknown role id {id}")))
            })
            .collect()
    }

    fn requested_permissions(&self, ids: &[PermissionId]) -> Result<Vec<Permission>> {
        ids.iter()
            .map(|&id| {
                self.store
                    .get_permission(id)?
                    .ok_or_else(|| Error::validation(format!("unknown permission id {id}")))
            })
            .collect()
    }

    // Roles

    pub fn create_role(
        &self,
        actor: &Actor,
        name: &str,
        permission_ids: Option<&[PermissionId]>,
    ) -> Result<Role> {
        if !self.policy.can_create_role(actor) {
            return Err(self.deny(actor, "role.create", 0, "you cannot create roles"));
        }
        self.store.create_role(name, &self.guard, permission_ids)
    }

    fn updatable<'a>(&'a self, actor: &'a Actor) -> impl Fn(&Role) -> Result<()> + 'a {
        move |role: &Role| {
            if self.policy.can_update_role(actor, role) {
                Ok(())
            } else {
                Err(self.deny(actor, "role.update", role.id, "you cannot modify this role"))
            }
        }
    }

    pub fn update_role(
        &self,
        actor: &Actor,
        id: RoleId,
        name: &str,
        permission_ids: Option<&[PermissionId]>,
    ) -> Result<Role> {
        self.store
            .update_role(id, Some(name), permission_ids, &self.updatable(actor))
    }

    /// Replace-all of a role's permission set under the update policy.
    pub fn sync_role_permissions(
        &self,
        actor: &Actor,
        id: RoleId,
        permission_ids: &[PermissionId],
    ) -> Result<Vec<Permission>> {
        self.store
            .update_role(id, None, Some(permission_ids), &self.updatable(actor))?;
        self.store.role_permissions(id)
    }

    pub fn delete_role(&self, actor: &Actor, id: RoleId) -> Result<()> {
        self.store.delete_roles(&[id], &|roles| match roles.first() {
            None => Err(Error::NotFound),
            Some(role) if !self.policy.can_delete_role(actor, role) => Err(self.deny(
                actor,
                "role.delete",
                id,
                "you cannot delete this role",
            )),
            Some(role) => Ok(vec![role.id]),
        })?;
        Ok(())
    }

    /// Deletes every listed role the actor may delete; the rest are skipped.
    pub fn bulk_delete_roles(&self, actor: &Actor, ids: &[RoleId]) -> Result<usize> {
        self.store
            .delete_roles(ids, &|roles| self.policy.filter_deletable_roles(actor, roles))
    }

    // Permissions

    fn holders_editable<'a>(
        &'a self,
        actor: &'a Actor,
    ) -> impl Fn(&PermissionHolders) -> Result<()> + 'a {
        move |change: &PermissionHolders| {
            let Some(requested) = &change.requested else {
                return Ok(());
            };
            self.policy
                .check_permission_holders(actor, &change.holders, requested)
                .inspect_err(|_| {
                    let target = change.permission.as_ref().map_or(0, |p| p.id);
                    tracing::debug!(
                        "Denied permission.roles on {} to user {}",
                        target,
                        actor.id()
                    );
                })
        }
    }

    /// Creates a permission, granting it to `master` in the same write so the
    /// top role keeps holding every permission. Every other role granted it
    /// must be one the actor may update.
    pub fn create_permission(
        &self,
        actor: &Actor,
        name: &str,
        guard: &str,
        role_ids: Option<&[RoleId]>,
    ) -> Result<Permission> {
        let ids = self.with_master(guard, role_ids.unwrap_or_default())?;
        self.store
            .create_permission(name, guard, Some(&ids), &self.holders_editable(actor))
    }

    /// Renames a permission. A replacement role list always keeps `master`.
    pub fn update_permission(
        &self,
        actor: &Actor,
        id: PermissionId,
        name: &str,
        role_ids: Option<&[RoleId]>,
    ) -> Result<Permission> {
        let ids = match role_ids {
            Some(ids) => {
                let permission = self.store.get_permission(id)?.ok_or(Error::NotFound)?;
                Some(self.with_master(&permission.guard_name, ids)?)
            }
            None => None,
        };
        self.store.update_permission(
            id,
            Some(name),
            ids.as_deref(),
            &self.holders_editable(actor),
        )
    }

    /// Replace-all of the roles holding a permission; `master` is kept.
    pub fn sync_permission_roles(
        &self,
        actor: &Actor,
        id: PermissionId,
        role_ids: &[RoleId],
    ) -> Result<Vec<Role>> {
        let permission = self.store.get_permission(id)?.ok_or(Error::NotFound)?;
        let ids = self.with_master(&permission.guard_name, role_ids)?;
        self.store
            .update_permission(id, None, Some(&ids), &self.holders_editable(actor))?;
        self.store.permission_roles(id)
    }

    fn with_master(&self, guard: &str, role_ids: &[RoleId]) -> Result<Vec<RoleId>> {
        let mut ids = role_ids.to_vec();
        let master_name = self.policy.protected().master.name;
        if let Some(master) = self.store.get_role_by_name(master_name, guard)? {
            if !ids.contains(&master.id) {
                ids.push(master.id);
            }
        }
        Ok(ids)
    }

    /// Deletes permissions by id. Ids must be distinct and exist.
    pub fn bulk_delete_permissions(&self, ids: &[PermissionId]) -> Result<usize> {
        if ids.is_empty() {
            return Err(Error::validation("no permissions selected"));
        }
        self.requested_permissions(ids)?;
        for (i, id) in ids.iter().enumerate() {
            if ids[..i].contains(id) {
                return Err(Error::validation(format!("duplicate permission id {id}")));
            }
        }
        self.store.delete_permissions(ids)
    }

    // Users

    pub fn create_user(
        &self,
        actor: &Actor,
        user: &NewUser,
        role_ids: &[RoleId],
        permission_ids: &[PermissionId],
    ) -> Result<User> {
        let roles = self.requested_roles(role_ids)?;
        self.policy.check_role_assignment(actor, None, &[], &roles)?;

        let permissions = self.requested_permissions(permission_ids)?;
        self.policy.check_direct_grants(actor, &[], &permissions)?;

        self.store.create_user(user, role_ids, permission_ids)
    }

    /// Applies `change` to user `id`. Policy is checked against the user's
    /// assignments inside the same write.
    pub fn update_user(&self, actor: &Actor, id: UserId, change: &UserChange<'_>) -> Result<()> {
        self.store.update_user(id, change, &|current: &UserAssignments| {
            self.policy
                .check_user_update(actor, &current.user, &current.roles)
                .inspect_err(|_| {
                    tracing::debug!("Denied user.update on {} to user {}", id, actor.id());
                })?;
            if let Some(requested) = &current.requested_roles {
                self.policy
                    .check_role_assignment(actor, Some(id), &current.roles, requested)?;
            }
            if let Some(requested) = &current.requested_permissions {
                self.policy
                    .check_direct_grants(actor, &current.direct_permissions, requested)?;
            }
            Ok(())
        })
    }

    /// Marks an unverified user as verified. The root user is never re-verified.
    pub fn verify_user(&self, actor: &Actor, id: UserId) -> Result<User> {
        self.policy.check_user_verify(id)?;
        let mut user = self.store.get_user(id)?.ok_or(Error::NotFound)?;
        if user.email_verified_at.is_none() {
            user.email_verified_at = Some(Utc::now());
            let change = UserChange {
                profile: Some(&user),
                ..UserChange::default()
            };
            self.update_user(actor, id, &change)?;
            tracing::info!("User {} verified user {}", actor.id(), id);
        }
        self.store.get_user(id)?.ok_or(Error::NotFound)
    }

    /// Replace-all of a user's roles under the escalation guard.
    pub fn sync_user_roles(&self, actor: &Actor, user_id: UserId, role_ids: &[RoleId]) -> Result<()> {
        let change = UserChange {
            role_ids: Some(role_ids),
            ..UserChange::default()
        };
        self.update_user(actor, user_id, &change)
    }

    /// Replace-all of a user's direct permissions under the escalation guard.
    pub fn sync_user_permissions(
        &self,
        actor: &Actor,
        user_id: UserId,
        permission_ids: &[PermissionId],
    ) -> Result<()> {
        let change = UserChange {
            permission_ids: Some(permission_ids),
            ..UserChange::default()
        };
        self.update_user(actor, user_id, &change)
    }

    pub fn delete_user(&self, actor: &Actor, id: UserId) -> Result<()> {
        if let Err(e) = self.policy.check_user_delete(actor, id) {
            tracing::debug!("Denied user.delete on {} to user {}", id, actor.id());
            return Err(e);
        }
        if self.store.delete_users(&[id])? == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    /// Deletes the listed users minus the root user and the actor, as one unit.
    pub fn bulk_delete_users(&self, actor: &Actor, ids: &[UserId]) -> Result<usize> {
        let targets = self.policy.filter_user_bulk_delete(actor, ids)?;
        self.store.delete_users(&targets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rbac::catalog::{self, seed};
    use crate::store::SqliteStore;
    use chrono::Utc;
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        store: Arc<dyn Store>,
        auth: Authorizer,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let store: Arc<dyn Store> =
            Arc::new(SqliteStore::new(temp.path().join("auth.db")).unwrap());
        store.initialize().unwrap();
        let protected = ProtectedEntities::default();
        seed(store.as_ref(), "web", &protected).unwrap();
        let auth = Authorizer::new(store.clone(), protected, "web");
        Fixture {
            _temp: temp,
            store,
            auth,
        }
    }

    fn add_user(store: &Arc<dyn Store>, username: &str, roles: &[RoleId]) -> User {
        store
            .create_user(
                &NewUser {
                    name: username.to_string(),
                    username: username.to_string(),
                    email: format!("{username}@test.dev"),
                    password_hash: "hash".to_string(),
                    email_verified_at: Some(Utc::now()),
                },
                roles,
                &[],
            )
            .unwrap()
    }

    fn root_actor(f: &Fixture) -> Actor {
        let root = add_user(&f.store, "root", &[1]);
        f.auth.actor(root).unwrap()
    }

    fn perm_id(store: &Arc<dyn Store>, name: &str) -> PermissionId {
        store.get_permission_by_name(name, "web").unwrap().unwrap().id
    }

    #[test]
    fn test_effective_permissions_union() {
        let f = fixture();
        let a = perm_id(&f.store, catalog::NOTES_VIEW);
        let b = perm_id(&f.store, catalog::NOTES_CREATE);
        let role = f.store.create_role("writer", "web", Some(&[a, b][..])).unwrap();

        let user = f
            .store
            .create_user(
                &NewUser {
                    name: "alice".to_string(),
                    username: "alice".to_string(),
                    email: "alice@test.dev".to_string(),
                    password_hash: "hash".to_string(),
                    email_verified_at: Some(Utc::now()),
                },
                &[role.id],
                &[a],
            )
            .unwrap();

        let effective = f.auth.effective_permissions(&user).unwrap();
        assert_eq!(
            effective.iter().collect::<Vec<_>>(),
            [catalog::NOTES_CREATE, catalog::NOTES_VIEW]
        );
        assert!(f.auth.has_permission(&user, catalog::NOTES_VIEW).unwrap());
        assert!(!f.auth.has_permission(&user, catalog::USERS_VIEW).unwrap());
    }

    #[test]
    fn test_master_holds_every_seeded_permission() {
        let f = fixture();
        let root = add_user(&f.store, "root", &[1]);
        let effective = f.auth.effective_permissions(&root).unwrap();
        assert_eq!(effective.len(), catalog::SEED_PERMISSIONS.len());
    }

    #[test]
    fn test_permission_checks_see_fresh_state() {
        let f = fixture();
        let root = root_actor(&f);
        let user = add_user(&f.store, "alice", &[3]);
        assert!(f.auth.has_permission(&user, catalog::NOTES_VIEW).unwrap());

        f.auth.sync_user_roles(&root, user.id, &[]).unwrap();
        assert!(!f.auth.has_permission(&user, catalog::NOTES_VIEW).unwrap());
    }

    #[test]
    fn test_protected_roles_survive_master() {
        let f = fixture();
        let root = add_user(&f.store, "root", &[1]);
        let actor = f.auth.actor(root.clone()).unwrap();

        for id in [1, 2, 3] {
            let role = f.store.get_role(id).unwrap().unwrap();
            assert!(!f.auth.policy().can_delete_role(&actor, &role));
            assert!(matches!(
                f.auth.delete_role(&actor, id),
                Err(Error::Forbidden(_))
            ));
        }
        assert!(f.store.get_role(2).unwrap().is_some());
    }

    #[test]
    fn test_master_updates_admin_but_not_master() {
        let f = fixture();
        let root = add_user(&f.store, "root", &[1]);
        let actor = f.auth.actor(root).unwrap();

        let result = f.auth.sync_role_permissions(&actor, 1, &[]);
        assert!(matches!(result, Err(Error::Forbidden(_))));
        assert_eq!(
            f.store.role_permissions(1).unwrap().len(),
            catalog::SEED_PERMISSIONS.len()
        );

        let view = perm_id(&f.store, catalog::USERS_VIEW);
        let perms = f.auth.sync_role_permissions(&actor, 2, &[view]).unwrap();
        assert_eq!(perms.len(), 1);
    }

    #[test]
    fn test_bulk_delete_roles_skips_protected() {
        let f = fixture();
        let root = add_user(&f.store, "root", &[1]);
        let actor = f.auth.actor(root).unwrap();
        let extra = f.store.create_role("extra", "web", None).unwrap();

        let deleted = f.auth.bulk_delete_roles(&actor, &[1, 2, extra.id, 404]).unwrap();
        assert_eq!(deleted, 1);
        assert!(f.store.get_role(extra.id).unwrap().is_none());

        let result = f.auth.bulk_delete_roles(&actor, &[1, 2, 3]);
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn test_new_permission_is_granted_to_master() {
        let f = fixture();
        let root = root_actor(&f);
        let created = f
            .auth
            .create_permission(&root, "reports.view", "web", None)
            .unwrap();

        let masters = f.store.permission_roles(created.id).unwrap();
        assert_eq!(masters.len(), 1);
        assert_eq!(masters[0].id, 1);

        let with_member = f
            .auth
            .create_permission(&root, "reports.export", "web", Some(&[3][..]))
            .unwrap();
        assert_eq!(f.store.permission_roles(with_member.id).unwrap().len(), 2);
    }

    #[test]
    fn test_permission_update_keeps_master() {
        let f = fixture();
        let root = root_actor(&f);
        let created = f
            .auth
            .create_permission(&root, "reports.view", "web", None)
            .unwrap();

        let renamed = f
            .auth
            .update_permission(&root, created.id, "reports.read", Some(&[3][..]))
            .unwrap();
        assert_eq!(renamed.name, "reports.read");

        let mut holders: Vec<RoleId> = f
            .store
            .permission_roles(created.id)
            .unwrap()
            .iter()
            .map(|r| r.id)
            .collect();
        holders.sort_unstable();
        assert_eq!(holders, vec![1, 3]);

        assert!(matches!(
            f.auth.update_permission(&root, 404, "x.y", None),
            Err(Error::NotFound)
        ));
    }

    #[test]
    fn test_sync_permission_roles_keeps_master() {
        let f = fixture();
        let root = root_actor(&f);
        let created = f
            .auth
            .create_permission(&root, "reports.view", "web", Some(&[2][..]))
            .unwrap();

        let roles = f.auth.sync_permission_roles(&root, created.id, &[]).unwrap();
        assert_eq!(roles.iter().map(|r| r.id).collect::<Vec<_>>(), vec![1]);

        assert!(matches!(
            f.auth.sync_permission_roles(&root, created.id, &[3, 3]),
            Err(Error::Validation(_))
        ));
        assert_eq!(f.store.permission_roles(created.id).unwrap().len(), 1);
    }

    #[test]
    #[test]
    fn test_admin_cannot_move_permissions_onto_reserved_roles() {
        let f = fixture();
        let _root = add_user(&f.store, "root", &[1]);
        let ada = add_user(&f.store, "ada", &[2]);
        let actor = f.auth.actor(ada).unwrap();
        let delete = perm_id(&f.store, catalog::USERS_DELETE);

        let result = f.auth.sync_permission_roles(&actor, delete, &[2]);
        assert!(matches!(result, Err(Error::Forbidden(_))));
        let holders: Vec<RoleId> = f
            .store
            .permission_roles(delete)
            .unwrap()
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(holders, vec![1]);

        let result = f
            .auth
            .create_permission(&actor, "reports.view", "web", Some(&[2][..]));
        assert!(matches!(result, Err(Error::Forbidden(_))));
        assert!(
            f.store
                .get_permission_by_name("reports.view", "web")
                .unwrap()
                .is_none()
        );

        let editor = f.store.create_role("editor", "web", None).unwrap();
        let roles = f
            .auth
            .sync_permission_roles(&actor, delete, &[editor.id])
            .unwrap();
        assert_eq!(roles.len(), 2);
    }

    #[test]
    fn test_bulk_delete_permissions_validation() {
        let f = fixture();
        let root = root_actor(&f);
        let a = f
            .auth
            .create_permission(&root, "reports.view", "web", None)
            .unwrap();

        assert!(matches!(
            f.auth.bulk_delete_permissions(&[a.id, a.id]),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            f.auth.bulk_delete_permissions(&[a.id, 999]),
            Err(Error::Validation(_))
        ));
        assert_eq!(f.auth.bulk_delete_permissions(&[a.id]).unwrap(), 1);
    }

    #[test]
    fn test_bulk_delete_users_filters_root_and_self() {
        let f = fixture();
        let _root = add_user(&f.store, "root", &[1]);
        let admin = add_user(&f.store, "boss", &[1]);
        let a = add_user(&f.store, "a", &[3]);
        let b = add_user(&f.store, "b", &[3]);
        let actor = f.auth.actor(admin.clone()).unwrap();

        let deleted = f
            .auth
            .bulk_delete_users(&actor, &[1, a.id, admin.id, b.id])
            .unwrap();
        assert_eq!(deleted, 2);
        assert!(f.store.get_user(1).unwrap().is_some());
        assert!(f.store.get_user(admin.id).unwrap().is_some());
        assert!(f.store.get_user(a.id).unwrap().is_none());

        let result = f.auth.bulk_delete_users(&actor, &[1, admin.id]);
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn test_admin_cannot_grant_master() {
        let f = fixture();
        let _root = add_user(&f.store, "root", &[1]);
        let admin = add_user(&f.store, "admin", &[2]);
        let target = add_user(&f.store, "target", &[3]);
        let actor = f.auth.actor(admin).unwrap();

        let result = f.auth.sync_user_roles(&actor, target.id, &[1]);
        assert!(matches!(result, Err(Error::Forbidden(_))));
        assert_eq!(f.store.user_roles(target.id).unwrap()[0].id, 3);

        let editor = f.store.create_role("editor", "web", None).unwrap();
        f.auth
            .sync_user_roles(&actor, target.id, &[3, editor.id])
            .unwrap();
        assert_eq!(f.store.user_roles(target.id).unwrap().len(), 2);
    }

    #[test]
    fn test_admin_cannot_grant_unheld_permission() {
        let f = fixture();
        let _root = add_user(&f.store, "root", &[1]);
        let admin = add_user(&f.store, "admin", &[2]);
        let target = add_user(&f.store, "target", &[3]);
        let actor = f.auth.actor(admin).unwrap();

        let manage = perm_id(&f.store, catalog::ROLES_MANAGE);
        let result = f.auth.sync_user_permissions(&actor, target.id, &[manage]);
        assert!(matches!(result, Err(Error::Forbidden(_))));

        let view = perm_id(&f.store, catalog::USERS_VIEW);
        f.auth
            .sync_user_permissions(&actor, target.id, &[view])
            .unwrap();
    }

    #[test]
    fn test_root_user_is_edited_only_by_itself() {
        let f = fixture();
        let root = add_user(&f.store, "root", &[1]);
        let other = add_user(&f.store, "other", &[1]);
        let actor = f.auth.actor(other).unwrap();

        let mut changed = root.clone();
        changed.email_verified_at = None;
        let change = UserChange {
            profile: Some(&changed),
            ..UserChange::default()
        };
        let result = f.auth.update_user(&actor, root.id, &change);
        assert!(matches!(result, Err(Error::Forbidden(_))));
        assert!(f.store.get_user(root.id).unwrap().unwrap().is_verified());

        assert!(matches!(
            f.auth.verify_user(&actor, root.id),
            Err(Error::Forbidden(_))
        ));
    }

    #[test]
    fn test_admin_cannot_edit_another_master() {
        let f = fixture();
        let _root = add_user(&f.store, "root", &[1]);
        let maxine = add_user(&f.store, "maxine", &[1]);
        let ada = add_user(&f.store, "ada", &[2]);
        let actor = f.auth.actor(ada).unwrap();

        let mut changed = maxine.clone();
        changed.password_hash = "hijacked".to_string();
        let change = UserChange {
            profile: Some(&changed),
            ..UserChange::default()
        };
        let result = f.auth.update_user(&actor, maxine.id, &change);
        assert!(matches!(result, Err(Error::Forbidden(_))));
        assert_eq!(
            f.store.get_user(maxine.id).unwrap().unwrap().password_hash,
            "hash"
        );

        let result = f.auth.sync_user_permissions(&actor, maxine.id, &[]);
        assert!(matches!(result, Err(Error::Forbidden(_))));
    }

    #[test]
    fn test_verify_user_marks_unverified() {
        let f = fixture();
        let root = root_actor(&f);
        let pending = f
            .store
            .create_user(
                &NewUser {
                    name: "pending".to_string(),
                    username: "pending".to_string(),
                    email: "pending@test.dev".to_string(),
                    password_hash: "hash".to_string(),
                    email_verified_at: None,
                },
                &[3],
                &[],
            )
            .unwrap();

        let verified = f.auth.verify_user(&root, pending.id).unwrap();
        assert!(verified.is_verified());
        assert!(matches!(f.auth.verify_user(&root, 404), Err(Error::NotFound)));
    }

    #[test]
    fn test_delete_user_guards() {
        let f = fixture();
        let root = add_user(&f.store, "root", &[1]);
        let actor = f.auth.actor(root.clone()).unwrap();

        assert!(matches!(
            f.auth.delete_user(&actor, root.id),
            Err(Error::Forbidden(_))
        ));
        assert!(matches!(f.auth.delete_user(&actor, 42), Err(Error::NotFound)));

        let member = add_user(&f.store, "member", &[3]);
        f.auth.delete_user(&actor, member.id).unwrap();
        assert!(f.store.get_user(member.id).unwrap().is_none());
    }
}
