use std::sync::Arc;

use axum::{Json, extract::State, response::IntoResponse};

use crate::auth::RequireUser;
use crate::rbac::catalog::{ROLES_MANAGE, USERS_VIEW};
use crate::server::AppState;
use crate::server::dto::{Dashboard, GlobalCounts, MyPermissions, UserDetail};
use crate::server::response::{ApiError, ApiResponse};
use crate::types::group_by_resource;

pub async fn get_me(auth: RequireUser, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let access = state.authorizer.user_access(&auth.actor.user)?;

    Ok::<_, ApiError>(Json(ApiResponse::success(UserDetail {
        user: auth.actor.user,
        access,
    })))
}

pub async fn get_my_permissions(auth: RequireUser) -> impl IntoResponse {
    let permissions = auth.actor.permissions;
    let grouped = group_by_resource(permissions.iter());

    Json(ApiResponse::success(MyPermissions {
        permissions,
        grouped,
    }))
}

/// Personal counters, plus catalog totals for administrators.
pub async fn dashboard(auth: RequireUser, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let actor = &auth.actor;
    let stats = state.store.owner_stats(actor.id())?;

    let global = if actor.can(USERS_VIEW) || actor.can(ROLES_MANAGE) {
        let guard = Some(state.authorizer.guard());
        Some(GlobalCounts {
            users: state.store.count_users()?,
            roles: state.store.count_roles(guard)?,
            permissions: state.store.count_permissions(guard)?,
        })
    } else {
        None
    };

    Ok::<_, ApiError>(Json(ApiResponse::success(Dashboard { stats, global })))
}
