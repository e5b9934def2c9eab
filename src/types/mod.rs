mod models;
mod permission;

pub use models::*;
pub use permission::{PermissionName, group_by_resource};
