//! Seeded roles and permissions, and the reserved ids the policy relies on.

use crate::error::{Error, Result};
use crate::store::Store;
use crate::types::{NewUser, Role, RoleId, User, UserId};

pub const USERS_VIEW: &str = "users.view";
pub const USERS_CREATE: &str = "users.create";
pub const USERS_UPDATE: &str = "users.update";
pub const USERS_DELETE: &str = "users.delete";
pub const NOTES_VIEW: &str = "notes.view";
pub const NOTES_CREATE: &str = "notes.create";
pub const NOTES_UPDATE: &str = "notes.update";
pub const NOTES_DELETE: &str = "notes.delete";
pub const FOLDERS_MANAGE: &str = "folders.manage";
pub const FILES_VIEW: &str = "files.view";
pub const FILES_CREATE: &str = "files.create";
pub const FILES_UPDATE: &str = "files.update";
pub const FILES_DELETE: &str = "files.delete";
pub const FOLDERS_FILES_MANAGE: &str = "folders_files.manage";
pub const ROLES_MANAGE: &str = "roles.manage";
pub const PERMISSIONS_MANAGE: &str = "permissions.manage";

pub const MASTER: &str = "master";
pub const ADMIN: &str = "admin";
pub const MEMBER: &str = "member";

/// Every permission the bootstrap process creates, in creation order.
pub const SEED_PERMISSIONS: &[&str] = &[
    USERS_VIEW,
    USERS_CREATE,
    USERS_UPDATE,
    USERS_DELETE,
    NOTES_VIEW,
    NOTES_CREATE,
    NOTES_UPDATE,
    NOTES_DELETE,
    FOLDERS_MANAGE,
    FILES_VIEW,
    FILES_CREATE,
    FILES_UPDATE,
    FILES_DELETE,
    FOLDERS_FILES_MANAGE,
    ROLES_MANAGE,
    PERMISSIONS_MANAGE,
];

const ADMIN_EXCLUDED: &[&str] = &[USERS_DELETE, ROLES_MANAGE, PERMISSIONS_MANAGE];

const MEMBER_GRANTS: &[&str] = &[
    NOTES_VIEW,
    NOTES_CREATE,
    NOTES_UPDATE,
    NOTES_DELETE,
    FOLDERS_MANAGE,
    FILES_VIEW,
    FILES_CREATE,
    FILES_UPDATE,
    FILES_DELETE,
    FOLDERS_FILES_MANAGE,
];

/// Initial permission set of a seeded role.
#[must_use]
pub fn seed_grants(role: &str) -> Vec<&'static str> {
    match role {
        MASTER => SEED_PERMISSIONS.to_vec(),
        ADMIN => SEED_PERMISSIONS
            .iter()
            .copied()
            .filter(|p| !ADMIN_EXCLUDED.contains(p))
            .collect(),
        MEMBER => MEMBER_GRANTS.to_vec(),
        _ => Vec::new(),
    }
}

/// A role whose meaning is fixed by id and name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservedRole {
    pub id: RoleId,
    pub name: &'static str,
}

impl ReservedRole {
    #[must_use]
    pub fn matches(&self, role: &Role) -> bool {
        role.id == self.id || role.name == self.name
    }
}

/// The reserved-entity table shared by bootstrap and the policy engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtectedEntities {
    /// Roles no one may delete.
    pub protected_role_ids: Vec<RoleId>,
    pub master: ReservedRole,
    pub admin: ReservedRole,
    pub member: ReservedRole,
    /// The user no one may delete.
    pub root_user_id: UserId,
}

impl Default for ProtectedEntities {
    fn default() -> Self {
        Self {
            protected_role_ids: vec![1, 2, 3],
            master: ReservedRole { id: 1, name: MASTER },
            admin: ReservedRole { id: 2, name: ADMIN },
            member: ReservedRole { id: 3, name: MEMBER },
            root_user_id: 1,
        }
    }
}

impl ProtectedEntities {
    #[must_use]
    pub fn is_protected_role(&self, id: RoleId) -> bool {
        self.protected_role_ids.contains(&id)
    }

    /// `master` or `admin`, matched by name or reserved id.
    #[must_use]
    pub fn is_reserved_role(&self, role: &Role) -> bool {
        self.master.matches(role) || self.admin.matches(role)
    }

    #[must_use]
    pub fn is_root_user(&self, id: UserId) -> bool {
        id == self.root_user_id
    }

    fn seeded_roles(&self) -> [&ReservedRole; 3] {
        [&self.master, &self.admin, &self.member]
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SeedReport {
    pub permissions_created: usize,
    pub roles_created: usize,
}

/// Creates the seed permissions and roles if missing and resets each seeded
/// role's permission set. Safe to run repeatedly.
///
/// Fails with `Config` when a seeded role ends up under an id other than its
/// reserved one, since the protected-id rules would then guard the wrong rows.
pub fn seed(store: &dyn Store, guard: &str, protected: &ProtectedEntities) -> Result<SeedReport> {
    let mut report = SeedReport::default();

    for name in SEED_PERMISSIONS {
        if store.get_permission_by_name(name, guard)?.is_none() {
            store.create_permission(name, guard, None, &|_| Ok(()))?;
            report.permissions_created += 1;
        }
    }

    for reserved in protected.seeded_roles() {
        let role = match store.get_role_by_name(reserved.name, guard)? {
            Some(role) => role,
            None => {
                report.roles_created += 1;
                store.create_role(reserved.name, guard, None)?
            }
        };

        if role.id != reserved.id {
            return Err(Error::Config(format!(
                "seeded role '{}' has id {} but id {} is reserved for it",
                role.name, role.id, reserved.id
            )));
        }

        let mut ids = Vec::new();
        for name in seed_grants(reserved.name) {
            let permission = store
                .get_permission_by_name(name, guard)?
                .ok_or(Error::NotFound)?;
            ids.push(permission.id);
        }
        store.replace_role_permissions(role.id, &ids)?;
    }

    tracing::info!(
        "Seeded {} permissions and {} roles (guard {})",
        report.permissions_created,
        report.roles_created,
        guard
    );

    Ok(report)
}

/// Creates the root account holding `master`. Only valid on an empty user table.
pub fn bootstrap_root_user(
    store: &dyn Store,
    user: &NewUser,
    guard: &str,
    protected: &ProtectedEntities,
) -> Result<User> {
    if store.count_users()? > 0 {
        return Err(Error::AlreadyExists);
    }

    let master = store
        .get_role_by_name(protected.master.name, guard)?
        .ok_or(Error::NotFound)?;
    let root = store.create_user(user, &[master.id], &[])?;

    if !protected.is_root_user(root.id) {
        return Err(Error::Config(format!(
            "root user was created with id {} but id {} is reserved",
            root.id, protected.root_user_id
        )));
    }

    tracing::info!("Created root user '{}'", root.username);
    Ok(root)
}
