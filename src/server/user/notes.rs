use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;

use crate::auth::RequireUser;
use crate::ownership::{owned, referenced_folder};
use crate::rbac::catalog::{NOTES_CREATE, NOTES_DELETE, NOTES_UPDATE, NOTES_VIEW};
use crate::server::AppState;
use crate::server::dto::{IdsRequest, NoteRequest};
use crate::server::response::{ApiError, ApiResponse, Deleted};
use crate::server::validation::validate_title;
use crate::store::{ItemQuery, Store, listing::ItemListParams};
use crate::types::{FolderKind, NewNote, UserId};

/// Resolves an optional target folder id to one of the actor's note folders.
fn check_folder(store: &dyn Store, folder_id: Option<i64>, actor: UserId) -> crate::error::Result<()> {
    if let Some(id) = folder_id {
        referenced_folder(store.get_folder(FolderKind::Notes, id)?, FolderKind::Notes, actor)?;
    }
    Ok(())
}

fn normalize_content(content: Option<String>) -> Option<String> {
    content.filter(|c| !c.trim().is_empty())
}

pub async fn list_notes(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Query(params): Query<ItemListParams>,
) -> impl IntoResponse {
    auth.actor.require(NOTES_VIEW)?;
    let query = ItemQuery::from_params(&params)?;

    let page = state.store.list_notes(auth.actor.id(), &query)?;

    Ok::<_, ApiError>(Json(ApiResponse::success(page)))
}

pub async fn create_note(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<NoteRequest>,
) -> impl IntoResponse {
    let actor = &auth.actor;
    actor.require(NOTES_CREATE)?;
    validate_title(&req.title)?;
    check_folder(state.store.as_ref(), req.folder_id, actor.id())?;

    let note = state.store.create_note(&NewNote {
        owner_id: actor.id(),
        folder_id: req.folder_id,
        title: req.title.trim().to_string(),
        content: normalize_content(req.content),
    })?;

    Ok::<_, ApiError>((StatusCode::CREATED, Json(ApiResponse::success(note))))
}

pub async fn get_note(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    auth.actor.require(NOTES_VIEW)?;
    let note = owned(state.store.get_note(id)?, auth.actor.id())?;

    Ok::<_, ApiError>(Json(ApiResponse::success(note)))
}

pub async fn update_note(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(req): Json<NoteRequest>,
) -> impl IntoResponse {
    let actor = &auth.actor;
    actor.require(NOTES_UPDATE)?;
    let mut note = owned(state.store.get_note(id)?, actor.id())?;

    validate_title(&req.title)?;
    check_folder(state.store.as_ref(), req.folder_id, actor.id())?;

    note.title = req.title.trim().to_string();
    note.content = normalize_content(req.content);
    note.folder_id = req.folder_id;
    note.updated_at = Utc::now();
    state.store.update_note(&note)?;

    Ok::<_, ApiError>(Json(ApiResponse::success(note)))
}

pub async fn delete_note(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    auth.actor.require(NOTES_DELETE)?;
    owned(state.store.get_note(id)?, auth.actor.id())?;

    state.store.delete_note(id)?;

    Ok::<_, ApiError>(StatusCode::NO_CONTENT)
}

/// Deletes the listed notes the actor owns; ids of other owners are skipped.
pub async fn bulk_delete_notes(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<IdsRequest>,
) -> impl IntoResponse {
    auth.actor.require(NOTES_DELETE)?;
    if req.ids.is_empty() {
        return Err(ApiError::unprocessable("No notes selected"));
    }

    let deleted = state.store.delete_owned_notes(auth.actor.id(), &req.ids)?;

    Ok::<_, ApiError>(Json(ApiResponse::success(Deleted { deleted })))
}
