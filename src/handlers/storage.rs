//! Part upload endpoint of the local object store.
//!
//! Signed URLs issued by `/api/upload/sign` point here. The signature in the
//! query string is the only credential; no session is required.
//!
//! - `PUT /storage/parts/{uploadId}/{partNumber}?expires=...&signature=...`

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::put,
    Router,
};
use chrono::Utc;
use serde::Deserialize;

use crate::error::{AppError, Result};
use crate::state::AppState;

/// Query string of a signed part URL
#[derive(Debug, Deserialize)]
pub struct SignedQuery {
    pub expires: i64,
    pub signature: String,
}

/// Receive one part
///
/// PUT /storage/parts/{uploadId}/{partNumber}
///
/// Returns the part's quoted MD5 in the `ETag` header.
async fn put_part(
    State(state): State<AppState>,
    Path((upload_id, part_number)): Path<(String, u32)>,
    Query(query): Query<SignedQuery>,
    body: Body,
) -> Result<Response> {
    let store = state
        .part_store
        .as_ref()
        .ok_or_else(|| AppError::not_found("Part uploads are not served by this instance"))?;

    store.verify_signature(
        &upload_id,
        part_number,
        query.expires,
        &query.signature,
        Utc::now(),
    )?;

    let etag = store
        .write_part(&upload_id, part_number, body.into_data_stream())
        .await?;

    let etag = HeaderValue::from_str(&etag)
        .map_err(|e| AppError::internal(format!("Invalid ETag header: {}", e)))?;

    Ok((StatusCode::OK, [(header::ETAG, etag)]).into_response())
}

/// Create storage routes
pub fn storage_routes() -> Router<AppState> {
    Router::new().route("/parts/{upload_id}/{part_number}", put(put_part))
}
