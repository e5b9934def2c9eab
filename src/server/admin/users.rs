use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;

use crate::auth::RequireUser;
use crate::rbac::catalog::{USERS_CREATE, USERS_DELETE, USERS_UPDATE, USERS_VIEW};
use crate::server::AppState;
use crate::server::dto::{CreateUserRequest, IdsRequest, UpdateUserRequest, UserDetail};
use crate::server::response::{ApiError, ApiResponse, Deleted, StoreOptionExt};
use crate::server::validation::{
    validate_display_name, validate_email, validate_password, validate_username,
};
use crate::store::{ListQuery, UserChange};
use crate::store::listing::{ListParams, USER_SORTS};
use crate::types::{NewUser, User, UserId};

fn load_user(state: &AppState, id: UserId) -> Result<User, ApiError> {
    state.store.get_user(id)?.or_not_found("User not found")
}

fn detail(state: &AppState, user: User) -> Result<UserDetail, ApiError> {
    let access = state.authorizer.user_access(&user)?;
    Ok(UserDetail { user, access })
}

pub async fn list_users(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> impl IntoResponse {
    auth.actor.require(USERS_VIEW)?;
    let query = ListQuery::from_params(&params, USER_SORTS);

    let page = state.store.list_users(&query)?;

    Ok::<_, ApiError>(Json(ApiResponse::success(page)))
}

pub async fn get_user(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<UserId>,
) -> impl IntoResponse {
    auth.actor.require(USERS_VIEW)?;
    let user = load_user(&state, id)?;

    Ok::<_, ApiError>(Json(ApiResponse::success(detail(&state, user)?)))
}

pub async fn create_user(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateUserRequest>,
) -> impl IntoResponse {
    let actor = &auth.actor;
    actor.require(USERS_CREATE)?;
    validate_display_name(&req.name)?;
    validate_username(&req.username)?;
    validate_email(&req.email)?;
    validate_password(&req.password)?;

    let new_user = NewUser {
        name: req.name.trim().to_string(),
        username: req.username,
        email: req.email.trim().to_string(),
        password_hash: state.passwords.hash(&req.password)?,
        email_verified_at: req.verified.then(Utc::now),
    };

    let user = state
        .authorizer
        .create_user(actor, &new_user, &req.roles, &req.permissions)?;
    tracing::info!("User {} created user '{}'", actor.id(), user.username);

    Ok::<_, ApiError>((
        StatusCode::CREATED,
        Json(ApiResponse::success(detail(&state, user)?)),
    ))
}

pub async fn update_user(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<UserId>,
    Json(req): Json<UpdateUserRequest>,
) -> impl IntoResponse {
    let actor = &auth.actor;
    actor.require(USERS_UPDATE)?;
    let mut user = load_user(&state, id)?;

    if let Some(name) = req.name {
        validate_display_name(&name)?;
        user.name = name.trim().to_string();
    }
    if let Some(username) = req.username {
        validate_username(&username)?;
        user.username = username;
    }
    if let Some(email) = req.email {
        validate_email(&email)?;
        user.email = email.trim().to_string();
    }
    if let Some(password) = req.password {
        validate_password(&password)?;
        user.password_hash = state.passwords.hash(&password)?;
    }
    match req.verified {
        Some(true) if user.email_verified_at.is_none() => user.email_verified_at = Some(Utc::now()),
        Some(false) => user.email_verified_at = None,
        _ => {}
    }

    let change = UserChange {
        profile: Some(&user),
        role_ids: req.roles.as_deref(),
        permission_ids: req.permissions.as_deref(),
    };
    state.authorizer.update_user(actor, id, &change)?;

    let user = load_user(&state, id)?;
    Ok::<_, ApiError>(Json(ApiResponse::success(detail(&state, user)?)))
}

pub async fn verify_user(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<UserId>,
) -> impl IntoResponse {
    auth.actor.require(USERS_UPDATE)?;

    let user = state.authorizer.verify_user(&auth.actor, id)?;

    Ok::<_, ApiError>(Json(ApiResponse::success(user)))
}

pub async fn sync_user_roles(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<UserId>,
    Json(req): Json<IdsRequest>,
) -> impl IntoResponse {
    auth.actor.require(USERS_UPDATE)?;

    state.authorizer.sync_user_roles(&auth.actor, id, &req.ids)?;

    let user = load_user(&state, id)?;
    Ok::<_, ApiError>(Json(ApiResponse::success(detail(&state, user)?)))
}

pub async fn sync_user_permissions(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<UserId>,
    Json(req): Json<IdsRequest>,
) -> impl IntoResponse {
    auth.actor.require(USERS_UPDATE)?;

    state
        .authorizer
        .sync_user_permissions(&auth.actor, id, &req.ids)?;

    let user = load_user(&state, id)?;
    Ok::<_, ApiError>(Json(ApiResponse::success(detail(&state, user)?)))
}

pub async fn delete_user(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<UserId>,
) -> impl IntoResponse {
    auth.actor.require(USERS_DELETE)?;

    state.authorizer.delete_user(&auth.actor, id)?;
    tracing::info!("User {} deleted user {}", auth.actor.id(), id);

    Ok::<_, ApiError>(StatusCode::NO_CONTENT)
}

pub async fn bulk_delete_users(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<IdsRequest>,
) -> impl IntoResponse {
    auth.actor.require(USERS_DELETE)?;

    let deleted = state.authorizer.bulk_delete_users(&auth.actor, &req.ids)?;

    Ok::<_, ApiError>(Json(ApiResponse::success(Deleted { deleted })))
}
