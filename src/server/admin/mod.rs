mod permissions;
mod roles;
mod users;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post, put},
};

use crate::server::AppState;

pub fn admin_router() -> Router<Arc<AppState>> {
    Router::new()
        // User routes
        .route("/users", get(users::list_users).post(users::create_user))
        .route("/users/bulk-delete", post(users::bulk_delete_users))
        .route(
            "/users/{id}",
            get(users::get_user)
                .put(users::update_user)
                .delete(users::delete_user),
        )
        .route("/users/{id}/verify", post(users::verify_user))
        .route("/users/{id}/roles", put(users::sync_user_roles))
        .route("/users/{id}/permissions", put(users::sync_user_permissions))
        // Role routes
        .route("/roles", get(roles::list_roles).post(roles::create_role))
        .route("/roles/all", get(roles::list_all_roles))
        .route("/roles/count", get(roles::count_roles))
        .route("/roles/bulk-delete", post(roles::bulk_delete_roles))
        .route(
            "/roles/{id}",
            get(roles::get_role)
                .put(roles::update_role)
                .delete(roles::delete_role),
        )
        .route("/roles/{id}/permissions", put(roles::sync_role_permissions))
        // Permission routes
        .route(
            "/permissions",
            get(permissions::list_permissions).post(permissions::create_permission),
        )
        .route("/permissions/all", get(permissions::list_all_permissions))
        .route("/permissions/count", get(permissions::count_permissions))
        .route(
            "/permissions/bulk-delete",
            post(permissions::bulk_delete_permissions),
        )
        .route(
            "/permissions/{id}",
            get(permissions::get_permission)
                .put(permissions::update_permission)
                .delete(permissions::delete_permission),
        )
        .route(
            "/permissions/{id}/roles",
            put(permissions::sync_permission_roles),
        )
}
