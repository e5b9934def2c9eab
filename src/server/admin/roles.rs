use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};

use crate::auth::RequireUser;
use crate::rbac::Actor;
use crate::rbac::catalog::ROLES_MANAGE;
use crate::server::AppState;
use crate::server::dto::{CatalogCount, GuardParams, IdsRequest, RoleRequest};
use crate::server::response::{ApiError, ApiResponse, Deleted, StoreOptionExt};
use crate::server::validation::validate_role_name;
use crate::store::ListQuery;
use crate::store::listing::{ListParams, ROLE_SORTS};
use crate::types::{Role, RoleId, RoleWithPermissions};

/// Every role endpoint needs `roles.manage` and the role-view policy.
fn require_role_access(state: &AppState, actor: &Actor) -> Result<(), ApiError> {
    actor.require(ROLES_MANAGE)?;
    if !state.authorizer.policy().can_view_roles(actor) {
        return Err(ApiError::forbidden("you cannot view roles"));
    }
    Ok(())
}

fn attach_permissions(state: &AppState, role: Role) -> crate::error::Result<RoleWithPermissions> {
    let permissions = state.store.role_permissions(role.id)?;
    Ok(RoleWithPermissions {
        permissions_count: permissions.len(),
        permissions,
        role,
    })
}

fn with_permissions(state: &AppState, id: RoleId) -> Result<RoleWithPermissions, ApiError> {
    let role = state.store.get_role(id)?.or_not_found("Role not found")?;
    Ok(attach_permissions(state, role)?)
}

pub async fn list_roles(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> impl IntoResponse {
    require_role_access(&state, &auth.actor)?;
    let query = ListQuery::from_params(&params, ROLE_SORTS);

    let page = state
        .store
        .list_roles(&query)?
        .try_map(|role| attach_permissions(&state, role))?;

    Ok::<_, ApiError>(Json(ApiResponse::success(page)))
}

/// Flat list for pickers, ordered by name.
pub async fn list_all_roles(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Query(params): Query<GuardParams>,
) -> impl IntoResponse {
    require_role_access(&state, &auth.actor)?;

    let roles = state.store.list_all_roles(params.guard_name.as_deref())?;

    Ok::<_, ApiError>(Json(ApiResponse::success(roles)))
}

pub async fn count_roles(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Query(params): Query<GuardParams>,
) -> impl IntoResponse {
    require_role_access(&state, &auth.actor)?;
    let guard_name = params
        .guard_name
        .unwrap_or_else(|| state.authorizer.guard().to_string());

    let total = state.store.count_roles(Some(&guard_name))?;

    Ok::<_, ApiError>(Json(ApiResponse::success(CatalogCount { guard_name, total })))
}

pub async fn get_role(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<RoleId>,
) -> impl IntoResponse {
    require_role_access(&state, &auth.actor)?;

    Ok::<_, ApiError>(Json(ApiResponse::success(with_permissions(&state, id)?)))
}

pub async fn create_role(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<RoleRequest>,
) -> impl IntoResponse {
    require_role_access(&state, &auth.actor)?;
    validate_role_name(&req.name)?;

    let role = state
        .authorizer
        .create_role(&auth.actor, req.name.trim(), req.permissions.as_deref())?;
    tracing::info!("User {} created role '{}'", auth.actor.id(), role.name);

    Ok::<_, ApiError>((
        StatusCode::CREATED,
        Json(ApiResponse::success(with_permissions(&state, role.id)?)),
    ))
}

pub async fn update_role(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<RoleId>,
    Json(req): Json<RoleRequest>,
) -> impl IntoResponse {
    require_role_access(&state, &auth.actor)?;
    validate_role_name(&req.name)?;

    state
        .authorizer
        .update_role(&auth.actor, id, req.name.trim(), req.permissions.as_deref())?;

    Ok::<_, ApiError>(Json(ApiResponse::success(with_permissions(&state, id)?)))
}

pub async fn sync_role_permissions(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<RoleId>,
    Json(req): Json<IdsRequest>,
) -> impl IntoResponse {
    require_role_access(&state, &auth.actor)?;

    let permissions = state
        .authorizer
        .sync_role_permissions(&auth.actor, id, &req.ids)?;

    Ok::<_, ApiError>(Json(ApiResponse::success(permissions)))
}

pub async fn delete_role(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<RoleId>,
) -> impl IntoResponse {
    require_role_access(&state, &auth.actor)?;

    state.authorizer.delete_role(&auth.actor, id)?;
    tracing::info!("User {} deleted role {}", auth.actor.id(), id);

    Ok::<_, ApiError>(StatusCode::NO_CONTENT)
}

pub async fn bulk_delete_roles(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<IdsRequest>,
) -> impl IntoResponse {
    require_role_access(&state, &auth.actor)?;

    let deleted = state.authorizer.bulk_delete_roles(&auth.actor, &req.ids)?;

    Ok::<_, ApiError>(Json(ApiResponse::success(Deleted { deleted })))
}
