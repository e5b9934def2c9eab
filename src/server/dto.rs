use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::rbac::{EffectivePermissions, UserAccess};
use crate::types::{OwnerStats, PermissionId, RoleId, User};

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    /// Username or email address.
    pub login: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub user: User,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub name: String,
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub roles: Vec<RoleId>,
    #[serde(default)]
    pub permissions: Vec<PermissionId>,
}

/// Absent fields are left unchanged; present role/permission lists replace
/// the current sets.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateUserRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub verified: Option<bool>,
    #[serde(default)]
    pub roles: Option<Vec<RoleId>>,
    #[serde(default)]
    pub permissions: Option<Vec<PermissionId>>,
}

#[derive(Debug, Deserialize)]
pub struct IdsRequest {
    pub ids: Vec<i64>,
}

#[derive(Debug, Deserialize)]
pub struct RoleRequest {
    pub name: String,
    #[serde(default)]
    pub permissions: Option<Vec<PermissionId>>,
}

#[derive(Debug, Deserialize)]
pub struct PermissionRequest {
    pub name: String,
    #[serde(default)]
    pub guard_name: Option<String>,
    #[serde(default)]
    pub roles: Option<Vec<RoleId>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct GuardParams {
    #[serde(default)]
    pub guard_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct NoteRequest {
    pub title: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub folder_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateFileRequest {
    pub title: String,
    #[serde(default)]
    pub folder_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct FolderRequest {
    pub name: String,
    #[serde(default)]
    pub parent_id: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct UserDetail {
    #[serde(flatten)]
    pub user: User,
    #[serde(flatten)]
    pub access: UserAccess,
}

#[derive(Debug, Serialize)]
pub struct MyPermissions {
    pub permissions: EffectivePermissions,
    pub grouped: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Serialize)]
pub struct TextPreview {
    pub content: String,
    pub truncated: bool,
}

#[derive(Debug, Serialize)]
pub struct GlobalCounts {
    pub users: i64,
    pub roles: i64,
    pub permissions: i64,
}

#[derive(Debug, Serialize)]
pub struct Dashboard {
    #[serde(flatten)]
    pub stats: OwnerStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub global: Option<GlobalCounts>,
}

#[derive(Debug, Serialize)]
pub struct CatalogCount {
    pub guard_name: String,
    pub total: i64,
}
