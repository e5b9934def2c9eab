use std::sync::Arc;
use std::time::Instant;

use axum::extract::{DefaultBodyLimit, Request};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::{Router, routing::get};
use tower::ServiceBuilder;

use super::admin::admin_router;
use super::session::session_router;
use super::user::user_router;
use crate::auth::{PasswordHasher, SessionTokens};
use crate::config::ServerConfig;
use crate::rbac::{Authorizer, ProtectedEntities};
use crate::storage::BlobStore;
use crate::store::Store;

/// Multipart framing on top of the largest accepted file.
const UPLOAD_OVERHEAD_BYTES: usize = 64 * 1024;

pub struct AppState {
    pub store: Arc<dyn Store>,
    pub authorizer: Authorizer,
    pub blobs: BlobStore,
    pub tokens: SessionTokens,
    pub passwords: PasswordHasher,
    pub config: ServerConfig,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, config: ServerConfig) -> Self {
        let authorizer = Authorizer::new(
            store.clone(),
            ProtectedEntities::default(),
            config.default_guard.clone(),
        );
        Self {
            blobs: BlobStore::new(&config.blob_dir()),
            store,
            authorizer,
            tokens: SessionTokens::new(),
            passwords: PasswordHasher::new(),
            config,
        }
    }
}

async fn health() -> &'static str {
    "OK"
}

async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let response = next.run(request).await;

    let latency = start.elapsed();
    let status = response.status();

    tracing::info!(
        "{} {} {} {}ms",
        method,
        uri.path(),
        status.as_u16(),
        latency.as_millis()
    );

    response
}

pub fn create_router(state: Arc<AppState>) -> Router {
    let body_limit = state.config.max_upload_bytes + UPLOAD_OVERHEAD_BYTES;

    Router::new()
        .route("/health", get(health))
        .nest("/api/v1/auth", session_router())
        .nest("/api/v1/admin", admin_router())
        .nest("/api/v1", user_router())
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn(log_request))
                .layer(DefaultBodyLimit::max(body_limit)),
        )
        .with_state(state)
}
