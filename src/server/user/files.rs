use std::sync::Arc;

use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use chrono::Utc;
use tokio_util::io::ReaderStream;

use crate::auth::RequireUser;
use crate::ownership::{owned, referenced_folder};
use crate::rbac::catalog::{FILES_CREATE, FILES_DELETE, FILES_UPDATE, FILES_VIEW};
use crate::server::AppState;
use crate::server::dto::{IdsRequest, TextPreview, UpdateFileRequest};
use crate::server::response::{ApiError, ApiResponse, Deleted};
use crate::server::validation::validate_title;
use crate::store::{ItemQuery, listing::ItemListParams};
use crate::types::{FileItem, FolderKind, NewFileItem, UserId};

const TEXT_PREVIEW_LIMIT: usize = 400 * 1024;
const TRUNCATION_MARKER: &str = "\n\n--- TRUNCATED ---";
const TEXT_MIME_TYPES: &[&str] = &[
    "text/plain",
    "text/csv",
    "application/json",
    "application/xml",
    "text/xml",
];
const TEXT_EXTENSIONS: &[&str] = &["txt", "log", "md", "csv", "json", "xml"];
const FALLBACK_MIME: &str = "application/octet-stream";

struct Upload {
    data: Bytes,
    original_name: String,
    mime_type: Option<String>,
    title: Option<String>,
    folder_id: Option<i64>,
}

/// Strips any client-side directory components from an uploaded file name.
fn base_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or("").trim();
    if base.is_empty() {
        "upload".to_string()
    } else {
        base.to_string()
    }
}

fn extension(name: &str) -> Option<String> {
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

fn is_text_like(file: &FileItem) -> bool {
    let mime = file
        .mime_type
        .as_deref()
        .and_then(|m| m.split(';').next())
        .map(str::trim);
    if mime.is_some_and(|m| TEXT_MIME_TYPES.contains(&m)) {
        return true;
    }
    extension(&file.original_name).is_some_and(|ext| TEXT_EXTENSIONS.contains(&ext.as_str()))
}

async fn read_upload(multipart: &mut Multipart, max_bytes: usize) -> Result<Upload, ApiError> {
    let mut file: Option<(Bytes, String, Option<String>)> = None;
    let mut title: Option<String> = None;
    let mut folder_id: Option<i64> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Failed to read multipart: {e}")))?
    {
        match field.name() {
            Some("file") => {
                let name = base_name(field.file_name().unwrap_or(""));
                let mime = field
                    .content_type()
                    .map(str::to_string)
                    .filter(|m| m != FALLBACK_MIME);
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Failed to read file: {e}")))?;
                if data.len() > max_bytes {
                    return Err(ApiError::payload_too_large(format!(
                        "File size ({} bytes) exceeds maximum allowed size ({max_bytes} bytes)",
                        data.len()
                    )));
                }
                file = Some((data, name, mime));
            }
            Some("title") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Failed to read title: {e}")))?;
                title = Some(text).filter(|t| !t.trim().is_empty());
            }
            Some("folder_id") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Failed to read folder_id: {e}")))?;
                let text = text.trim();
                if !text.is_empty() && text != "null" {
                    folder_id = Some(text.parse().map_err(|_| {
                        ApiError::unprocessable(format!("Invalid folder_id: {text}"))
                    })?);
                }
            }
            _ => {}
        }
    }

    let (data, original_name, mime_type) =
        file.ok_or_else(|| ApiError::unprocessable("File field is required"))?;

    Ok(Upload {
        data,
        original_name,
        mime_type,
        title,
        folder_id,
    })
}

fn check_folder(state: &AppState, folder_id: Option<i64>, actor: UserId) -> crate::error::Result<()> {
    if let Some(id) = folder_id {
        referenced_folder(state.store.get_folder(FolderKind::Files, id)?, FolderKind::Files, actor)?;
    }
    Ok(())
}

/// Deletes file rows, then each blob no remaining row points at. Blob
/// failures are logged; the rows stay deleted.
async fn delete_files(state: &AppState, ids: &[i64]) -> crate::error::Result<usize> {
    let _refs = state.blobs.lock_refs().await;
    let deleted = state.store.delete_files(ids)?;

    for removed in deleted.iter().filter(|d| !d.blob_shared) {
        if let Err(e) = state.blobs.delete(&removed.file.storage_path).await {
            tracing::warn!("Failed to delete blob {}: {e}", removed.file.storage_path);
        }
    }
    Ok(deleted.len())
}

async fn stream_file(state: &AppState, file: &FileItem, disposition: &str) -> Result<Response, ApiError> {
    let (reader, size) = state
        .blobs
        .open(&file.storage_path)
        .await
        .map_err(crate::error::Error::from)?;

    let content_type = file.mime_type.as_deref().unwrap_or(FALLBACK_MIME);
    let content_disposition = format!(
        "{disposition}; filename*=UTF-8''{}",
        urlencoding::encode(&file.original_name)
    );

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(
            header::CONTENT_TYPE,
            HeaderValue::from_str(content_type).unwrap_or(HeaderValue::from_static(FALLBACK_MIME)),
        )
        .header(header::CONTENT_LENGTH, size)
        .header(header::CONTENT_DISPOSITION, content_disposition)
        .header("X-Content-Type-Options", "nosniff")
        .body(Body::from_stream(ReaderStream::new(reader)))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response());

    Ok(response)
}

pub async fn list_files(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Query(params): Query<ItemListParams>,
) -> impl IntoResponse {
    auth.actor.require(FILES_VIEW)?;
    let query = ItemQuery::from_params(&params)?;

    let page = state.store.list_files(auth.actor.id(), &query)?;

    Ok::<_, ApiError>(Json(ApiResponse::success(page)))
}

pub async fn upload_file(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> impl IntoResponse {
    let actor = &auth.actor;
    actor.require(FILES_CREATE)?;

    let upload = read_upload(&mut multipart, state.config.max_upload_bytes).await?;
    let title = upload
        .title
        .unwrap_or_else(|| upload.original_name.clone());
    validate_title(&title)?;
    check_folder(&state, upload.folder_id, actor.id())?;

    let refs = state.blobs.lock_refs().await;
    let stored = state
        .blobs
        .put(actor.id(), &upload.data)
        .await
        .map_err(crate::error::Error::from)?;

    let file = state.store.create_file(&NewFileItem {
        owner_id: actor.id(),
        folder_id: upload.folder_id,
        title: title.trim().to_string(),
        original_name: upload.original_name,
        storage_path: stored.locator,
        mime_type: upload.mime_type,
        size_bytes: stored.size,
    })?;
    drop(refs);
    tracing::info!(
        "User {} uploaded file {} ({} bytes)",
        actor.id(),
        file.id,
        file.size_bytes
    );

    Ok::<_, ApiError>((StatusCode::CREATED, Json(ApiResponse::success(file))))
}

pub async fn get_file(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    auth.actor.require(FILES_VIEW)?;
    let file = owned(state.store.get_file(id)?, auth.actor.id())?;

    Ok::<_, ApiError>(Json(ApiResponse::success(file)))
}

pub async fn update_file(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateFileRequest>,
) -> impl IntoResponse {
    let actor = &auth.actor;
    actor.require(FILES_UPDATE)?;
    let mut file = owned(state.store.get_file(id)?, actor.id())?;

    validate_title(&req.title)?;
    check_folder(&state, req.folder_id, actor.id())?;

    file.title = req.title.trim().to_string();
    file.folder_id = req.folder_id;
    file.updated_at = Utc::now();
    state.store.update_file(&file)?;

    Ok::<_, ApiError>(Json(ApiResponse::success(file)))
}

pub async fn download_file(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    auth.actor.require(FILES_VIEW)?;
    let file = owned(state.store.get_file(id)?, auth.actor.id())?;

    stream_file(&state, &file, "attachment").await
}

pub async fn preview_file(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    auth.actor.require(FILES_VIEW)?;
    let file = owned(state.store.get_file(id)?, auth.actor.id())?;

    stream_file(&state, &file, "inline").await
}

/// Returns the head of a text-like file as UTF-8, marked when cut short.
pub async fn text_preview(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    auth.actor.require(FILES_VIEW)?;
    let file = owned(state.store.get_file(id)?, auth.actor.id())?;

    if !is_text_like(&file) {
        return Err(ApiError::unprocessable("File cannot be previewed as text"));
    }

    let (head, truncated) = state
        .blobs
        .read_prefix(&file.storage_path, TEXT_PREVIEW_LIMIT)
        .await
        .map_err(crate::error::Error::from)?;

    let mut content = String::from_utf8_lossy(&head).into_owned();
    if truncated {
        content.push_str(TRUNCATION_MARKER);
    }

    Ok::<_, ApiError>(Json(ApiResponse::success(TextPreview { content, truncated })))
}

pub async fn delete_file(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    auth.actor.require(FILES_DELETE)?;
    let file = owned(state.store.get_file(id)?, auth.actor.id())?;

    if delete_files(&state, &[file.id]).await? == 0 {
        return Err(ApiError::not_found("File not found"));
    }

    Ok::<_, ApiError>(StatusCode::NO_CONTENT)
}

/// Deletes the listed files the actor owns; ids of other owners are skipped.
pub async fn bulk_delete_files(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<IdsRequest>,
) -> impl IntoResponse {
    auth.actor.require(FILES_DELETE)?;
    if req.ids.is_empty() {
        return Err(ApiError::unprocessable("No files selected"));
    }

    let owned: Vec<i64> = state
        .store
        .list_owned_files(auth.actor.id(), &req.ids)?
        .iter()
        .map(|f| f.id)
        .collect();
    let deleted = delete_files(&state, &owned).await?;

    Ok::<_, ApiError>(Json(ApiResponse::success(Deleted { deleted })))
}
