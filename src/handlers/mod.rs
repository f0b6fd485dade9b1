//! HTTP request handlers for the SaaS API server.
//!
//! This module contains all endpoint handlers organized by functionality:
//! - `auth`: Magic link login, session lookup and logout
//! - `upload`: Multipart upload orchestration and file management
//! - `storage`: Part uploads to the local object store
//! - `email`: Templated email sending for trusted backends
//! - `admin`: Administrative endpoints (local only)
//! - `health`: Health check endpoints

pub mod admin;
pub mod auth;
pub mod email;
pub mod health;
pub mod storage;
pub mod upload;

pub use admin::admin_routes;
pub use auth::auth_routes;
pub use email::email_routes;
pub use health::health_routes;
pub use storage::storage_routes;
pub use upload::{file_routes, upload_routes};

use axum::extract::FromRequest;

use crate::error::AppError;

/// JSON body extractor whose rejections use the API error format
#[derive(Debug, Clone, Copy, Default, FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct ApiJson<T>(pub T);
