//! Admin API handlers (local only).
//!
//! These endpoints are only accessible from localhost and provide
//! account support functionality.
//!
//! ## Endpoints
//!
//! - `GET /admin/users` - List users (`?offset=&limit=`)
//! - `GET /admin/users/{id}` - User details with their files
//! - `DELETE /admin/users/{id}/sessions` - Sign a user out everywhere
//! - `POST /admin/cleanup` - Run the cleanup sweep now
//!
//! ## Security
//!
//! The admin API is bound to 127.0.0.1 only and should never be
//! exposed to the public internet.

use axum::{
    extract::{Path, Query, State},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{FileResponse, UserResponse};
use crate::state::{AppState, CleanupReport};

/// Largest page of users returned at once
const MAX_PAGE_SIZE: usize = 500;

/// Pagination query
#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default)]
    pub offset: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    100
}

/// List users
///
/// GET /admin/users
async fn list_users(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
) -> Result<Json<Vec<UserResponse>>> {
    let users = state
        .db
        .list_users(page.offset, page.limit.min(MAX_PAGE_SIZE))?;

    Ok(Json(users.iter().map(UserResponse::from).collect()))
}

/// User details
#[derive(Debug, Serialize)]
pub struct UserDetailResponse {
    pub user: UserResponse,
    pub files: Vec<FileResponse>,
}

/// Get a user and their files
///
/// GET /admin/users/{id}
async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<UserDetailResponse>> {
    let user = state
        .db
        .get_user(id)?
        .ok_or_else(|| AppError::not_found(format!("User not found: {}", id)))?;

    let part_size = state.uploads.part_size();
    let files = state
        .uploads
        .list_files(id)?
        .iter()
        .map(|record| FileResponse::from_record(record, part_size))
        .collect();

    Ok(Json(UserDetailResponse {
        user: UserResponse::from(&user),
        files,
    }))
}

/// Revoke response
#[derive(Debug, Serialize)]
pub struct RevokeResponse {
    pub success: bool,
    pub id: Uuid,
    pub sessions_revoked: usize,
}

/// Revoke all sessions of a user
///
/// DELETE /admin/users/{id}/sessions
async fn revoke_sessions(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RevokeResponse>> {
    if state.db.get_user(id)?.is_none() {
        return Err(AppError::not_found(format!("User not found: {}", id)));
    }

    let sessions_revoked = state.sessions.invalidate_all(id)?;
    info!(user_id = %id, sessions_revoked, "Revoked user sessions");

    Ok(Json(RevokeResponse {
        success: true,
        id,
        sessions_revoked,
    }))
}

/// Run the cleanup sweep
///
/// POST /admin/cleanup
async fn cleanup(State(state): State<AppState>) -> Result<Json<CleanupReport>> {
    Ok(Json(state.cleanup().await?))
}

/// Create admin routes
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users))
        .route("/users/{id}", get(get_user))
        .route("/users/{id}/sessions", delete(revoke_sessions))
        .route("/cleanup", post(cleanup))
}
