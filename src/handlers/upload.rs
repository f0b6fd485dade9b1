//! Upload handlers for direct-to-storage multipart uploads.
//!
//! The server never proxies file bytes through these endpoints. Clients
//! create an upload, ask for one signed URL per part, PUT the parts straight
//! to storage and finally complete (or abort) the upload.
//!
//! ## Multipart Upload
//! - `POST /api/upload/create` - Start an upload, returns `uploadId` and `key`
//! - `POST /api/upload/sign` - Signed URL for one part
//! - `POST /api/upload/list` - Parts storage has received (for resuming)
//! - `POST /api/upload/complete` - Assemble the parts
//! - `POST /api/upload/abort` - Discard the upload
//!
//! ## Files
//! - `GET /api/files` - The caller's files
//! - `DELETE /api/files/{id}` - Delete a file
//!
//! # Example
//!
//! ```bash
//! # 1. Create
//! curl -X POST http://localhost:3000/api/upload/create -b "session=$TOKEN" \
//!   -H "Content-Type: application/json" \
//!   -d '{"filename": "report.pdf", "size": 10485760}'
//!
//! # 2. Sign and upload each part
//! curl -X POST http://localhost:3000/api/upload/sign -b "session=$TOKEN" \
//!   -H "Content-Type: application/json" \
//!   -d '{"uploadId": "...", "partNumber": 1}'
//! curl -X PUT "$SIGNED_URL" --data-binary @part1
//!
//! # 3. Complete with the returned ETags
//! curl -X POST http://localhost:3000/api/upload/complete -b "session=$TOKEN" \
//!   -H "Content-Type: application/json" \
//!   -d '{"uploadId": "...", "parts": [{"partNumber": 1, "etag": "\"...\""}]}'
//! ```

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Serialize;
use uuid::Uuid;

use crate::config::UPLOAD_POLICY;
use crate::error::Result;
use crate::handlers::ApiJson;
use crate::middleware::AuthUser;
use crate::models::{
    CompleteUploadRequest, CreateUploadRequest, FileResponse, SignPartRequest, SignedPartResponse,
    UploadIdRequest,
};
use crate::state::AppState;

/// Start a multipart upload
///
/// POST /api/upload/create
///
/// Rate limited per user with the `upload` policy.
async fn create_upload(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiJson(request): ApiJson<CreateUploadRequest>,
) -> Result<Response> {
    let decision = state
        .enforce_rate_limit(UPLOAD_POLICY, &auth.user.id.to_string())
        .await?;

    let record = state.uploads.create(auth.user.id, request).await?;

    let mut response = (
        StatusCode::CREATED,
        Json(FileResponse::from_record(&record, state.uploads.part_size())),
    )
        .into_response();

    if let Some(decision) = decision {
        decision.apply_headers(response.headers_mut());
    }

    Ok(response)
}

/// Sign one part
///
/// POST /api/upload/sign
async fn sign_part(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiJson(request): ApiJson<SignPartRequest>,
) -> Result<Json<SignedPartResponse>> {
    let signed = state.uploads.sign_part(auth.user.id, request).await?;
    Ok(Json(signed))
}

/// List received parts
///
/// POST /api/upload/list
async fn list_parts(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiJson(request): ApiJson<UploadIdRequest>,
) -> Result<Json<FileResponse>> {
    let record = state
        .uploads
        .list_parts(auth.user.id, &request.upload_id)
        .await?;

    Ok(Json(FileResponse::from_record(&record, state.uploads.part_size())))
}

/// Complete an upload
///
/// POST /api/upload/complete
///
/// Storage rejections (unknown part, ETag mismatch) are returned with the
/// storage message.
async fn complete_upload(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiJson(request): ApiJson<CompleteUploadRequest>,
) -> Result<Json<FileResponse>> {
    let record = state.uploads.complete(auth.user.id, request).await?;
    Ok(Json(FileResponse::from_record(&record, state.uploads.part_size())))
}

/// Abort an upload
///
/// POST /api/upload/abort
async fn abort_upload(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiJson(request): ApiJson<UploadIdRequest>,
) -> Result<Json<AbortResponse>> {
    state.uploads.abort(auth.user.id, &request.upload_id).await?;

    Ok(Json(AbortResponse {
        success: true,
        upload_id: request.upload_id,
    }))
}

/// Abort response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AbortResponse {
    pub success: bool,
    pub upload_id: String,
}

/// List the caller's files, newest first
///
/// GET /api/files
async fn list_files(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Vec<FileResponse>>> {
    let part_size = state.uploads.part_size();
    let files = state
        .uploads
        .list_files(auth.user.id)?
        .iter()
        .map(|record| FileResponse::from_record(record, part_size))
        .collect();

    Ok(Json(files))
}

/// Delete a file and its object
///
/// DELETE /api/files/{id}
async fn delete_file(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    state.uploads.delete_file(auth.user.id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Create upload routes
pub fn upload_routes() -> Router<AppState> {
    Router::new()
        .route("/create", post(create_upload))
        .route("/sign", post(sign_part))
        .route("/list", post(list_parts))
        .route("/complete", post(complete_upload))
        .route("/abort", post(abort_upload))
}

/// Create file routes
pub fn file_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_files))
        .route("/{id}", delete(delete_file))
}
