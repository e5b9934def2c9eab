//! Login, logout and self-registration.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::post,
};

use crate::auth::{RequireUser, issue_session};
use crate::error::Error;
use crate::server::AppState;
use crate::server::dto::{LoginRequest, LoginResponse, RegisterRequest};
use crate::server::response::{ApiError, ApiResponse};
use crate::server::validation::{
    validate_display_name, validate_email, validate_password, validate_username,
};
use crate::types::NewUser;

pub fn session_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/register", post(register))
}

async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> impl IntoResponse {
    let user = state
        .store
        .get_user_by_login(req.login.trim())?
        .filter(|user| state.passwords.verify(&req.password, &user.password_hash))
        .ok_or_else(|| {
            tracing::info!("Failed login for '{}'", req.login.trim());
            ApiError::from(Error::Unauthorized)
        })?;

    let (session, token) = issue_session(
        state.store.as_ref(),
        &state.tokens,
        user.id,
        state.config.session_ttl_hours,
    )?;

    Ok::<_, ApiError>(Json(ApiResponse::success(LoginResponse {
        token,
        expires_at: session.expires_at,
        user,
    })))
}

async fn logout(auth: RequireUser, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.store.delete_session(&auth.session.id)?;
    tracing::info!("User {} logged out", auth.actor.id());
    Ok::<_, ApiError>(StatusCode::NO_CONTENT)
}

/// Creates an unverified account holding only the member role.
async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> impl IntoResponse {
    validate_display_name(&req.name)?;
    validate_username(&req.username)?;
    validate_email(&req.email)?;
    validate_password(&req.password)?;

    let member_name = state.authorizer.policy().protected().member.name;
    let member = state
        .store
        .get_role_by_name(member_name, state.authorizer.guard())?
        .ok_or_else(|| ApiError::internal("Member role is not seeded"))?;

    let new_user = NewUser {
        name: req.name.trim().to_string(),
        username: req.username,
        email: req.email.trim().to_string(),
        password_hash: state.passwords.hash(&req.password)?,
        email_verified_at: None,
    };

    let user = state.store.create_user(&new_user, &[member.id], &[])?;
    tracing::info!("Registered user '{}'", user.username);

    Ok::<_, ApiError>((StatusCode::CREATED, Json(ApiResponse::success(user))))
}
