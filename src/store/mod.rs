pub mod listing;
mod schema;
mod sqlite;

pub use listing::{FolderFilter, ItemQuery, ListParams, ListQuery, Page};
pub use sqlite::SqliteStore;

use crate::error::Result;
use crate::types::*;

/// A policy check run against state read inside the transaction that applies
/// a write. An `Err` aborts the write.
pub type Check<'a, T> = &'a dyn Fn(&T) -> Result<()>;

/// A user's assignment state as seen by the transaction changing it.
#[derive(Debug, Clone)]
pub struct UserAssignments {
    pub user: User,
    pub roles: Vec<Role>,
    pub direct_permissions: Vec<Permission>,
    /// Replacement sets resolved from the requested ids, when given.
    pub requested_roles: Option<Vec<Role>>,
    pub requested_permissions: Option<Vec<Permission>>,
}

/// A change to one user. `None` fields are left as they are.
#[derive(Debug, Clone, Copy, Default)]
pub struct UserChange<'a> {
    /// Profile fields (name, username, email, password hash, verification).
    pub profile: Option<&'a User>,
    pub role_ids: Option<&'a [RoleId]>,
    pub permission_ids: Option<&'a [PermissionId]>,
}

/// The roles holding a permission as seen by the transaction changing them.
/// `permission` is `None` while the permission is being created.
#[derive(Debug, Clone)]
pub struct PermissionHolders {
    pub permission: Option<Permission>,
    pub holders: Vec<Role>,
    pub requested: Option<Vec<Role>>,
}

/// A deleted file row and whether any other row still points at its blob.
#[derive(Debug, Clone)]
pub struct DeletedFile {
    pub file: FileItem,
    pub blob_shared: bool,
}

/// Store defines the database interface.
///
/// Every method that writes more than one row (replace-all assignment syncs,
/// create/update with assignments, bulk deletes) runs as a single atomic unit
/// of work: either every row is written or none are.
pub trait Store: Send + Sync {
    fn initialize(&self) -> Result<()>;

    // User operations
    fn create_user(
        &self,
        user: &NewUser,
        role_ids: &[RoleId],
        permission_ids: &[PermissionId],
    ) -> Result<User>;
    fn get_user(&self, id: UserId) -> Result<Option<User>>;
    /// Resolves a login handle against username first, then email.
    fn get_user_by_login(&self, login: &str) -> Result<Option<User>>;
    fn list_users(&self, query: &ListQuery) -> Result<Page<User>>;
    fn count_users(&self) -> Result<i64>;
    /// Applies `change` after `check` accepts the user's current assignments.
    /// `Some` assignment lists replace the current sets.
    fn update_user(
        &self,
        id: UserId,
        change: &UserChange<'_>,
        check: Check<'_, UserAssignments>,
    ) -> Result<()>;
    /// Soft-deletes every listed user and drops their sessions. Returns rows affected.
    fn delete_users(&self, ids: &[UserId]) -> Result<usize>;

    // Role operations
    fn create_role(
        &self,
        name: &str,
        guard: &str,
        permission_ids: Option<&[PermissionId]>,
    ) -> Result<Role>;
    fn get_role(&self, id: RoleId) -> Result<Option<Role>>;
    fn get_role_by_name(&self, name: &str, guard: &str) -> Result<Option<Role>>;
    fn list_roles(&self, query: &ListQuery) -> Result<Page<Role>>;
    fn list_all_roles(&self, guard: Option<&str>) -> Result<Vec<Role>>;
    fn count_roles(&self, guard: Option<&str>) -> Result<i64>;
    /// Renames the role and/or replaces its permissions once `check` accepts
    /// the current row.
    fn update_role(
        &self,
        id: RoleId,
        name: Option<&str>,
        permission_ids: Option<&[PermissionId]>,
        check: Check<'_, Role>,
    ) -> Result<Role>;
    /// Loads the existing roles among `ids` and deletes the ones `select`
    /// returns, in one transaction.
    fn delete_roles(
        &self,
        ids: &[RoleId],
        select: &dyn Fn(&[Role]) -> Result<Vec<RoleId>>,
    ) -> Result<usize>;

    // Permission operations
    fn create_permission(
        &self,
        name: &str,
        guard: &str,
        role_ids: Option<&[RoleId]>,
        check: Check<'_, PermissionHolders>,
    ) -> Result<Permission>;
    fn get_permission(&self, id: PermissionId) -> Result<Option<Permission>>;
    fn get_permission_by_name(&self, name: &str, guard: &str) -> Result<Option<Permission>>;
    fn list_permissions(&self, query: &ListQuery) -> Result<Page<Permission>>;
    fn list_all_permissions(&self, guard: Option<&str>) -> Result<Vec<Permission>>;
    fn count_permissions(&self, guard: Option<&str>) -> Result<i64>;
    fn update_permission(
        &self,
        id: PermissionId,
        name: Option<&str>,
        role_ids: Option<&[RoleId]>,
        check: Check<'_, PermissionHolders>,
    ) -> Result<Permission>;
    fn delete_permissions(&self, ids: &[PermissionId]) -> Result<usize>;

    // Assignment graph reads
    fn role_permissions(&self, role_id: RoleId) -> Result<Vec<Permission>>;
    fn permission_roles(&self, permission_id: PermissionId) -> Result<Vec<Role>>;
    fn user_roles(&self, user_id: UserId) -> Result<Vec<Role>>;
    fn user_direct_permissions(&self, user_id: UserId) -> Result<Vec<Permission>>;
    /// Permissions reachable through the user's roles, distinct by permission.
    fn user_role_permissions(&self, user_id: UserId) -> Result<Vec<Permission>>;

    // Assignment graph replace-all
    /// Unchecked replace-all used by seeding.
    fn replace_role_permissions(&self, role_id: RoleId, ids: &[PermissionId]) -> Result<()>;

    // Folder operations (one tree per kind and owner)
    fn create_folder(
        &self,
        kind: FolderKind,
        owner_id: UserId,
        parent_id: Option<i64>,
        name: &str,
    ) -> Result<Folder>;
    fn get_folder(&self, kind: FolderKind, id: i64) -> Result<Option<Folder>>;
    fn list_folders(&self, kind: FolderKind, owner_id: UserId) -> Result<Vec<Folder>>;
    fn update_folder(&self, folder: &Folder) -> Result<()>;
    /// Deletes the folder, moving direct items and child folders to the root.
    fn delete_folder(&self, kind: FolderKind, id: i64) -> Result<bool>;

    // Note operations
    fn create_note(&self, note: &NewNote) -> Result<Note>;
    fn get_note(&self, id: i64) -> Result<Option<Note>>;
    fn list_notes(&self, owner_id: UserId, query: &ItemQuery) -> Result<Page<Note>>;
    fn update_note(&self, note: &Note) -> Result<()>;
    fn delete_note(&self, id: i64) -> Result<bool>;
    /// Deletes the listed notes that belong to `owner_id`; other ids are ignored.
    fn delete_owned_notes(&self, owner_id: UserId, ids: &[i64]) -> Result<usize>;

    // File operations
    fn create_file(&self, file: &NewFileItem) -> Result<FileItem>;
    fn get_file(&self, id: i64) -> Result<Option<FileItem>>;
    fn list_files(&self, owner_id: UserId, query: &ItemQuery) -> Result<Page<FileItem>>;
    fn list_owned_files(&self, owner_id: UserId, ids: &[i64]) -> Result<Vec<FileItem>>;
    fn update_file(&self, file: &FileItem) -> Result<()>;
    /// Deletes the listed file rows and reports, per row, whether its blob is
    /// still referenced by a remaining row. Missing ids are skipped.
    fn delete_files(&self, ids: &[i64]) -> Result<Vec<DeletedFile>>;

    fn owner_stats(&self, owner_id: UserId) -> Result<OwnerStats>;

    // Session operations
    fn create_session(&self, session: &Session) -> Result<()>;
    fn get_session_by_lookup(&self, lookup: &str) -> Result<Option<Session>>;
    fn delete_session(&self, id: &str) -> Result<bool>;
    fn update_session_last_used(&self, id: &str) -> Result<()>;
}
