//! Middleware components for the SaaS API server.
//!
//! This module contains middleware for:
//! - Rate limiting
//! - API key authentication
//! - Session authentication (extractor and cookies)

pub mod auth;
pub mod rate_limit;
pub mod session;

pub use auth::{ApiKey, ApiKeyAuth};
pub use rate_limit::{extract_client_ip, RateLimitLayer};
pub use session::{
    clear_session_cookie, session_cookie, session_token, AuthUser, SessionRenewalLayer,
    SESSION_COOKIE,
};
