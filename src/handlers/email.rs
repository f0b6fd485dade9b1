//! Email-send endpoint for trusted backends.
//!
//! - `POST /api/email/send` - Queue a templated email (API key required)
//!
//! ```bash
//! curl -X POST http://localhost:3000/api/email/send \
//!   -H "Authorization: Bearer $API_KEY" \
//!   -H "Content-Type: application/json" \
//!   -d '{"template": "welcome", "email": "ada@example.com", "name": "Ada"}'
//! ```

use axum::{
    extract::State,
    http::StatusCode,
    routing::post,
    Extension, Json, Router,
};
use serde::Serialize;
use uuid::Uuid;

use crate::config::EMAIL_POLICY;
use crate::error::{AppError, Result};
use crate::handlers::ApiJson;
use crate::middleware::{ApiKey, ApiKeyAuth};
use crate::models::{hash_token, normalize_email, SendEmailRequest};
use crate::state::AppState;

/// Send response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendEmailResponse {
    pub job_id: Uuid,
    pub template: &'static str,
    pub email: String,
}

/// Queue an email
///
/// POST /api/email/send
///
/// Delivery happens in the background; 202 means the job was accepted.
async fn send_email(
    State(state): State<AppState>,
    Extension(ApiKey(api_key)): Extension<ApiKey>,
    ApiJson(request): ApiJson<SendEmailRequest>,
) -> Result<(StatusCode, Json<SendEmailResponse>)> {
    let email = normalize_email(&request.email)
        .ok_or_else(|| AppError::validation("Invalid recipient address"))?;

    // Keys are not kept in counter names
    state
        .enforce_rate_limit(EMAIL_POLICY, &hash_token(&api_key))
        .await?;

    let template = request.template.name();
    let job_id = state.email.enqueue(&email, request.template);

    Ok((
        StatusCode::ACCEPTED,
        Json(SendEmailResponse {
            job_id,
            template,
            email,
        }),
    ))
}

/// Create email routes, guarded by API key authentication
pub fn email_routes(auth: &ApiKeyAuth) -> Router<AppState> {
    Router::new()
        .route("/send", post(send_email))
        .route_layer(auth.layer())
}
