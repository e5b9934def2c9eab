//! Folder trees for notes and files. Both kinds share these handlers; the
//! kind picks the table and the permission that guards it.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, put},
};
use chrono::Utc;

use crate::auth::RequireUser;
use crate::ownership::{owned, referenced_folder};
use crate::rbac::catalog::{FOLDERS_FILES_MANAGE, FOLDERS_MANAGE};
use crate::server::AppState;
use crate::server::dto::FolderRequest;
use crate::server::response::{ApiError, ApiResponse};
use crate::server::validation::validate_folder_name;
use crate::tree::{build_forest, check_parent};
use crate::types::FolderKind;

fn manage_permission(kind: FolderKind) -> &'static str {
    match kind {
        FolderKind::Notes => FOLDERS_MANAGE,
        FolderKind::Files => FOLDERS_FILES_MANAGE,
    }
}

pub fn folder_routes(prefix: &str, kind: FolderKind) -> Router<Arc<AppState>> {
    Router::new()
        .route(
            prefix,
            get(move |auth: RequireUser, state: State<Arc<AppState>>| {
                folder_tree(kind, auth, state)
            })
            .post(
                move |auth: RequireUser,
                      state: State<Arc<AppState>>,
                      req: Json<FolderRequest>| { create_folder(kind, auth, state, req) },
            ),
        )
        .route(
            &format!("{prefix}/{{id}}"),
            put(
                move |auth: RequireUser,
                      state: State<Arc<AppState>>,
                      id: Path<i64>,
                      req: Json<FolderRequest>| {
                    update_folder(kind, auth, state, id, req)
                },
            )
            .delete(
                move |auth: RequireUser, state: State<Arc<AppState>>, id: Path<i64>| {
                    delete_folder(kind, auth, state, id)
                },
            ),
        )
}

async fn folder_tree(
    kind: FolderKind,
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    auth.actor.require(manage_permission(kind))?;

    let folders = state.store.list_folders(kind, auth.actor.id())?;

    Ok(Json(ApiResponse::success(build_forest(folders))))
}

async fn create_folder(
    kind: FolderKind,
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<FolderRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = &auth.actor;
    actor.require(manage_permission(kind))?;
    validate_folder_name(&req.name)?;

    if let Some(parent_id) = req.parent_id {
        referenced_folder(state.store.get_folder(kind, parent_id)?, kind, actor.id())?;
    }

    let folder = state
        .store
        .create_folder(kind, actor.id(), req.parent_id, req.name.trim())?;
    tracing::debug!("Created {} {} for user {}", kind, folder.id, actor.id());

    Ok((StatusCode::CREATED, Json(ApiResponse::success(folder))))
}

/// Renames and re-parents a folder. The new parent must be another folder of
/// the same owner and kind that is not inside the moved folder.
async fn update_folder(
    kind: FolderKind,
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(req): Json<FolderRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = &auth.actor;
    actor.require(manage_permission(kind))?;
    let mut folder = owned(state.store.get_folder(kind, id)?, actor.id())?;

    validate_folder_name(&req.name)?;
    if let Some(parent_id) = req.parent_id {
        referenced_folder(state.store.get_folder(kind, parent_id)?, kind, actor.id())?;
        let siblings = state.store.list_folders(kind, actor.id())?;
        check_parent(&siblings, folder.id, Some(parent_id))?;
    }

    folder.name = req.name.trim().to_string();
    folder.parent_id = req.parent_id;
    folder.updated_at = Utc::now();
    state.store.update_folder(&folder)?;

    Ok(Json(ApiResponse::success(folder)))
}

/// Deletes a folder. Its items and child folders move to the root.
async fn delete_folder(
    kind: FolderKind,
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    auth.actor.require(manage_permission(kind))?;
    owned(state.store.get_folder(kind, id)?, auth.actor.id())?;

    state.store.delete_folder(kind, id)?;

    Ok(StatusCode::NO_CONTENT)
}
