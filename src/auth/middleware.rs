use std::sync::Arc;

use axum::{
    Json,
    extract::FromRequestParts,
    http::{HeaderValue, StatusCode, header::AUTHORIZATION, header::WWW_AUTHENTICATE, request::Parts},
    response::{IntoResponse, Response},
};
use serde_json::json;

use super::helpers::{SessionError, extract_token_from_header, validate_session};
use crate::rbac::Actor;
use crate::server::AppState;
use crate::types::Session;

/// Extractor that requires a live session. Resolves the acting user's
/// roles and effective permissions once for the whole request.
pub struct RequireUser {
    pub session: Session,
    pub actor: Actor,
}

#[derive(Debug)]
pub enum AuthError {
    MissingAuth,
    InvalidScheme,
    InvalidToken,
    TokenExpired,
    Unverified,
    InternalError,
}

impl From<SessionError> for AuthError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::InvalidScheme => AuthError::InvalidScheme,
            SessionError::InvalidToken => AuthError::InvalidToken,
            SessionError::TokenExpired => AuthError::TokenExpired,
            SessionError::InternalError => AuthError::InternalError,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthError::MissingAuth => (StatusCode::UNAUTHORIZED, "Authentication required"),
            AuthError::InvalidScheme => (StatusCode::UNAUTHORIZED, "Invalid authorization scheme"),
            AuthError::InvalidToken => (StatusCode::UNAUTHORIZED, "Invalid token"),
            AuthError::TokenExpired => (StatusCode::UNAUTHORIZED, "Session expired"),
            AuthError::Unverified => (StatusCode::FORBIDDEN, "Email address is not verified"),
            AuthError::InternalError => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        };

        let body = json!({ "data": null, "error": message });

        let mut response = (status, Json(body)).into_response();

        if status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                WWW_AUTHENTICATE,
                HeaderValue::from_static("Bearer realm=\"elroi\""),
            );
        }

        response
    }
}

impl FromRequestParts<Arc<AppState>> for RequireUser {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok());

        let raw_token = extract_token_from_header(auth_header)?.ok_or(AuthError::MissingAuth)?;

        let (session, user) = validate_session(state.store.as_ref(), &state.tokens, &raw_token)?;

        if state.config.require_verified_email && !user.is_verified() {
            tracing::debug!("Rejected unverified user {}", user.id);
            return Err(AuthError::Unverified);
        }

        let actor = state.authorizer.actor(user).map_err(|e| {
            tracing::error!("Failed to resolve permissions: {e}");
            AuthError::InternalError
        })?;

        Ok(RequireUser { session, actor })
    }
}
