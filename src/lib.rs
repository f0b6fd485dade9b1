//! # SaaS API Server
//!
//! The backend core of a SaaS product: sessions, rate limiting, direct-to-storage
//! uploads and transactional email.
//!
//! ## Features
//!
//! - **Sessions**: Hashed, sliding-expiry sessions behind a `session` cookie
//! - **Magic Links**: Passwordless login by single-use emailed links
//! - **Rate Limiting**: Sliding-window limits per IP, user, email or API key
//! - **Multipart Uploads**: Presigned part URLs, completion, abort and reconciliation
//! - **Email**: Templated messages delivered in the background with retries
//! - **Admin API**: User support endpoints on localhost
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                       HTTP Server                        │
//! │  ┌──────────┐ ┌────────────┐ ┌───────────┐ ┌───────────┐ │
//! │  │ Auth API │ │ Upload API │ │ Email API │ │ Admin API │ │
//! │  └──────────┘ └────────────┘ └───────────┘ └───────────┘ │
//! ├──────────────────────────────────────────────────────────┤
//! │                        Services                          │
//! │  ┌───────────┐ ┌─────────────┐ ┌──────────┐ ┌──────────┐ │
//! │  │  Session  │ │    Rate     │ │  Upload  │ │  Email   │ │
//! │  │ Validator │ │   Limiter   │ │ Orchestr.│ │ Service  │ │
//! │  └───────────┘ └─────────────┘ └──────────┘ └──────────┘ │
//! ├──────────────────────────────────────────────────────────┤
//! │       RocksDB  ·  Object Store  ·  Counter Store         │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # Start the server
//! cargo run --release
//!
//! # Ask for a login link
//! curl -X POST http://localhost:3000/api/auth/magic-link \
//!   -H "Content-Type: application/json" -d '{"email": "ada@example.com"}'
//! ```

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod state;

pub use config::{AuthConfig, Config};
pub use error::{AppError, Result};
pub use middleware::{ApiKeyAuth, AuthUser, RateLimitLayer, SessionRenewalLayer};
pub use state::{AppState, Clients};

use axum::http::{header, HeaderName};
use axum::Router;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};
use tracing::{error, info};

use crate::config::API_POLICY;

/// Run the API server with the given configuration.
///
/// This function starts both the public and admin API servers.
pub async fn run(config: Config) -> anyhow::Result<()> {
    // Create application state
    let state = AppState::new(config.clone()).await?;

    // Create public API router
    let public_app = create_public_router(state.clone());

    // Create admin API router
    let admin_app = create_admin_router(state.clone());

    // Start servers
    let public_addr: SocketAddr =
        format!("{}:{}", config.server.host, config.server.port).parse()?;

    let admin_addr: SocketAddr =
        format!("{}:{}", config.server.admin_host, config.server.admin_port).parse()?;

    info!(
        address = %public_addr,
        "Public API server starting"
    );

    info!(
        address = %admin_addr,
        "Admin API server starting"
    );

    // Start cleanup task
    let cleanup_state = state.clone();
    tokio::spawn(async move {
        cleanup_task(cleanup_state).await;
    });

    // Run both servers concurrently
    let public_listener = TcpListener::bind(public_addr).await?;
    let admin_listener = TcpListener::bind(admin_addr).await?;

    tokio::select! {
        result = axum::serve(
            public_listener,
            public_app.into_make_service_with_connect_info::<SocketAddr>(),
        ) => {
            if let Err(e) = result {
                error!(error = %e, "Public server error");
            }
        }
        result = axum::serve(admin_listener, admin_app) => {
            if let Err(e) = result {
                error!(error = %e, "Admin server error");
            }
        }
    }

    Ok(())
}

/// Create the public API router
pub fn create_public_router(state: AppState) -> Router {
    // CORS configuration; browsers need to read part ETags and rate limit headers
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([
            header::ETAG,
            header::RETRY_AFTER,
            HeaderName::from_static("x-ratelimit-success"),
            HeaderName::from_static("x-ratelimit-limit"),
            HeaderName::from_static("x-ratelimit-remaining"),
            HeaderName::from_static("x-ratelimit-reset"),
        ]);

    // Body size limit (from config)
    let body_limit = RequestBodyLimitLayer::new(state.config.server.max_body_size);

    // Rate limiter for every public request (from config)
    let rate_limit = RateLimitLayer::new(
        state.rate_limiter.clone(),
        API_POLICY,
        state.config.server.trust_forwarded_headers,
    );

    // API key authentication for the email endpoint (from config)
    let api_auth = ApiKeyAuth::new(&state.config.auth);

    if state.config.auth.api_keys.is_empty() {
        info!("No API keys configured; the email endpoint rejects every request");
    }

    if state.rate_limiter.is_enabled() {
        info!(
            policies = state.config.rate_limit.policies.len(),
            "Rate limiting enabled"
        );
    }

    let mut router = Router::new()
        .nest("/api/auth", handlers::auth_routes())
        .nest("/api/upload", handlers::upload_routes())
        .nest("/api/files", handlers::file_routes())
        .nest("/api/email", handlers::email_routes(&api_auth))
        .nest("/health", handlers::health_routes());

    if state.part_store.is_some() {
        router = router.nest("/storage", handlers::storage_routes());
    }

    router
        .layer(SessionRenewalLayer)
        .layer(cors)
        .layer(body_limit)
        .layer(rate_limit)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Create the admin API router (localhost only)
pub fn create_admin_router(state: AppState) -> Router {
    Router::new()
        .nest("/admin", handlers::admin_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Background task for periodic cleanup
async fn cleanup_task(state: AppState) {
    let interval = Duration::from_secs(state.cleanup_interval());

    loop {
        tokio::time::sleep(interval).await;

        if let Err(e) = state.cleanup().await {
            error!(error = %e, "Cleanup sweep failed");
        }
    }
}
