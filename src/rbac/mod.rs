//! Role-based authorization: the seeded catalog, effective-permission
//! derivation, the role/user policy predicates and the [`Authorizer`] that
//! applies them against current store state.

mod authorizer;
pub mod catalog;
mod effective;
mod policy;

pub use authorizer::{Authorizer, UserAccess};
pub use catalog::{ProtectedEntities, ReservedRole};
pub use effective::EffectivePermissions;
pub use policy::{Policy, Tier};

use crate::error::{Error, Result};
use crate::types::{Role, User, UserId};

/// The acting user of one operation with a permission snapshot taken when
/// the operation started.
#[derive(Debug, Clone)]
pub struct Actor {
    pub user: User,
    pub roles: Vec<Role>,
    pub permissions: EffectivePermissions,
}

impl Actor {
    #[must_use]
    pub fn id(&self) -> UserId {
        self.user.id
    }

    #[must_use]
    pub fn can(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }

    /// Fails with `Forbidden` unless the actor holds `permission`.
    pub fn require(&self, permission: &str) -> Result<()> {
        if self.can(permission) {
            return Ok(());
        }
        tracing::debug!(
            "Denied permission {} to user {}",
            permission,
            self.user.id
        );
        Err(Error::forbidden(format!("missing permission {permission}")))
    }

    #[must_use]
    pub fn holds_role(&self, role: &Role) -> bool {
        self.roles.iter().any(|r| r.id == role.id)
    }
}
