//! Authentication handlers.
//!
//! - `POST /api/auth/magic-link` - Email a login link
//! - `GET /api/auth/magic-link/verify?token=...` - Exchange the link for a session cookie
//! - `GET /api/auth/session` - Current user and session expiry
//! - `POST /api/auth/logout` - Revoke the session and clear the cookie

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

use crate::config::MAGIC_LINK_POLICY;
use crate::error::{AppError, Result};
use crate::handlers::ApiJson;
use crate::middleware::{clear_session_cookie, session_cookie, session_token, AuthUser};
use crate::models::{normalize_email, MagicLinkRequest, MagicLinkVerifyQuery, SessionResponse};
use crate::state::AppState;

/// Generic acknowledgement
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: &'static str,
}

/// Request a magic link
///
/// POST /api/auth/magic-link
///
/// The response does not reveal whether the account existed.
async fn request_magic_link(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<MagicLinkRequest>,
) -> Result<(StatusCode, Json<MessageResponse>)> {
    let email = normalize_email(&request.email)
        .ok_or_else(|| AppError::validation("Invalid email address"))?;

    state.enforce_rate_limit(MAGIC_LINK_POLICY, &email).await?;
    state.magic_links.request(&email)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(MessageResponse {
            success: true,
            message: "If the address can sign in, a link is on its way",
        }),
    ))
}

/// Verify a magic link and start a session
///
/// GET /api/auth/magic-link/verify
async fn verify_magic_link(
    State(state): State<AppState>,
    Query(query): Query<MagicLinkVerifyQuery>,
) -> Result<Response> {
    let (token, validated) = state.magic_links.verify(&query.token)?;

    let cookie = session_cookie(
        token.as_str(),
        state.sessions.lifetime(),
        state.secure_cookies(),
    );

    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(SessionResponse::from(&validated)),
    )
        .into_response())
}

/// Current session
///
/// GET /api/auth/session
async fn current_session(auth: AuthUser) -> Json<SessionResponse> {
    Json(SessionResponse {
        user: (&auth.user).into(),
        expires_at: auth.session.expires_at,
    })
}

/// Log out
///
/// POST /api/auth/logout
///
/// Always clears the cookie, even when the session was already gone.
async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Result<Response> {
    if let Some(token) = session_token(&headers) {
        state.sessions.invalidate(&token)?;
    }

    Ok((
        [(header::SET_COOKIE, clear_session_cookie(state.secure_cookies()))],
        Json(MessageResponse {
            success: true,
            message: "Signed out",
        }),
    )
        .into_response())
}

/// Create auth routes
pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/magic-link", post(request_magic_link))
        .route("/magic-link/verify", get(verify_magic_link))
        .route("/session", get(current_session))
        .route("/logout", post(logout))
}
