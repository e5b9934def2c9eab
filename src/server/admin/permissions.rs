use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};

use crate::auth::RequireUser;
use crate::rbac::catalog::{PERMISSIONS_MANAGE, ROLES_MANAGE};
use crate::server::AppState;
use crate::server::dto::{CatalogCount, GuardParams, IdsRequest, PermissionRequest};
use crate::server::response::{ApiError, ApiResponse, Deleted, StoreOptionExt};
use crate::store::ListQuery;
use crate::store::listing::{ListParams, PERMISSION_SORTS};
use crate::types::{Permission, PermissionId, PermissionName, PermissionWithRoles};

fn attach_roles(state: &AppState, permission: Permission) -> crate::error::Result<PermissionWithRoles> {
    let roles = state.store.permission_roles(permission.id)?;
    Ok(PermissionWithRoles {
        roles_count: roles.len(),
        roles,
        permission,
    })
}

fn with_roles(state: &AppState, id: PermissionId) -> Result<PermissionWithRoles, ApiError> {
    let permission = state
        .store
        .get_permission(id)?
        .or_not_found("Permission not found")?;
    Ok(attach_roles(state, permission)?)
}

pub async fn list_permissions(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> impl IntoResponse {
    auth.actor.require(ROLES_MANAGE)?;
    let query = ListQuery::from_params(&params, PERMISSION_SORTS);

    let page = state
        .store
        .list_permissions(&query)?
        .try_map(|permission| attach_roles(&state, permission))?;

    Ok::<_, ApiError>(Json(ApiResponse::success(page)))
}

pub async fn list_all_permissions(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Query(params): Query<GuardParams>,
) -> impl IntoResponse {
    auth.actor.require(ROLES_MANAGE)?;

    let permissions = state
        .store
        .list_all_permissions(params.guard_name.as_deref())?;

    Ok::<_, ApiError>(Json(ApiResponse::success(permissions)))
}

pub async fn count_permissions(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Query(params): Query<GuardParams>,
) -> impl IntoResponse {
    auth.actor.require(ROLES_MANAGE)?;
    let guard_name = params
        .guard_name
        .unwrap_or_else(|| state.authorizer.guard().to_string());

    let total = state.store.count_permissions(Some(&guard_name))?;

    Ok::<_, ApiError>(Json(ApiResponse::success(CatalogCount { guard_name, total })))
}

pub async fn get_permission(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<PermissionId>,
) -> impl IntoResponse {
    auth.actor.require(ROLES_MANAGE)?;

    Ok::<_, ApiError>(Json(ApiResponse::success(with_roles(&state, id)?)))
}

pub async fn create_permission(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<PermissionRequest>,
) -> impl IntoResponse {
    auth.actor.require(PERMISSIONS_MANAGE)?;
    let name = PermissionName::parse(&req.name)?;
    let guard = req
        .guard_name
        .as_deref()
        .map(str::trim)
        .filter(|g| !g.is_empty())
        .unwrap_or(state.authorizer.guard());

    let permission = state
        .authorizer
        .create_permission(&auth.actor, &name.to_string(), guard, req.roles.as_deref())?;
    tracing::info!(
        "User {} created permission '{}'",
        auth.actor.id(),
        permission.name
    );

    Ok::<_, ApiError>((
        StatusCode::CREATED,
        Json(ApiResponse::success(with_roles(&state, permission.id)?)),
    ))
}

pub async fn update_permission(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<PermissionId>,
    Json(req): Json<PermissionRequest>,
) -> impl IntoResponse {
    auth.actor.require(PERMISSIONS_MANAGE)?;
    let name = PermissionName::parse(&req.name)?;

    state
        .authorizer
        .update_permission(&auth.actor, id, &name.to_string(), req.roles.as_deref())?;

    Ok::<_, ApiError>(Json(ApiResponse::success(with_roles(&state, id)?)))
}

pub async fn sync_permission_roles(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<PermissionId>,
    Json(req): Json<IdsRequest>,
) -> impl IntoResponse {
    auth.actor.require(PERMISSIONS_MANAGE)?;

    let roles = state
        .authorizer
        .sync_permission_roles(&auth.actor, id, &req.ids)?;

    Ok::<_, ApiError>(Json(ApiResponse::success(roles)))
}

pub async fn delete_permission(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<PermissionId>,
) -> impl IntoResponse {
    auth.actor.require(PERMISSIONS_MANAGE)?;

    if state.store.delete_permissions(&[id])? == 0 {
        return Err(ApiError::not_found("Permission not found"));
    }
    tracing::info!("User {} deleted permission {}", auth.actor.id(), id);

    Ok::<_, ApiError>(StatusCode::NO_CONTENT)
}

pub async fn bulk_delete_permissions(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<IdsRequest>,
) -> impl IntoResponse {
    auth.actor.require(PERMISSIONS_MANAGE)?;

    let deleted = state.authorizer.bulk_delete_permissions(&req.ids)?;

    Ok::<_, ApiError>(Json(ApiResponse::success(Deleted { deleted })))
}
