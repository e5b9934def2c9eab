mod files;
mod folders;
mod me;
mod notes;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};

use crate::server::AppState;
use crate::types::FolderKind;

pub fn user_router() -> Router<Arc<AppState>> {
    Router::new()
        // Current user
        .route("/me", get(me::get_me))
        .route("/me/permissions", get(me::get_my_permissions))
        .route("/dashboard", get(me::dashboard))
        // Notes
        .route("/notes", get(notes::list_notes).post(notes::create_note))
        .route("/notes/bulk-delete", post(notes::bulk_delete_notes))
        .route(
            "/notes/{id}",
            get(notes::get_note)
                .put(notes::update_note)
                .delete(notes::delete_note),
        )
        // Files
        .route("/files", get(files::list_files).post(files::upload_file))
        .route("/files/bulk-delete", post(files::bulk_delete_files))
        .route(
            "/files/{id}",
            get(files::get_file)
                .put(files::update_file)
                .delete(files::delete_file),
        )
        .route("/files/{id}/download", get(files::download_file))
        .route("/files/{id}/preview", get(files::preview_file))
        .route("/files/{id}/text", get(files::text_preview))
        // Folder trees, one per kind
        .merge(folders::folder_routes("/notes/folders", FolderKind::Notes))
        .merge(folders::folder_routes("/files/folders", FolderKind::Files))
}
