//! API Key authentication middleware.
//!
//! Guards server-to-server endpoints (email sending). Keys are configured in
//! the config file; the accepted key is stored in the request extensions as
//! [`ApiKey`] so handlers can rate limit per caller.
//!
//! # Authentication Methods
//!
//! The middleware accepts API keys via:
//! 1. `Authorization: Bearer <api_key>` header
//! 2. `X-API-Key: <api_key>` header
//!
//! # Example
//!
//! ```rust,ignore
//! let auth = ApiKeyAuth::new(&config.auth);
//! let app = Router::new()
//!     .route("/send", post(send_email))
//!     .route_layer(auth.layer());
//! ```

use axum::{
    body::Body,
    http::Request,
    response::{IntoResponse, Response},
};
use std::{
    collections::HashSet,
    sync::Arc,
    task::{Context, Poll},
};
use tower::{Layer, Service};
use tracing::{debug, warn};

use crate::config::AuthConfig;
use crate::error::AppError;

/// API key that authenticated the current request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiKey(pub String);

/// API Key authentication middleware
#[derive(Clone)]
pub struct ApiKeyAuth {
    /// Set of valid API keys for O(1) lookup
    valid_keys: Arc<HashSet<String>>,
}

impl ApiKeyAuth {
    /// Create a new API key authenticator from configuration
    pub fn new(config: &AuthConfig) -> Self {
        let valid_keys: HashSet<String> = config
            .api_keys
            .iter()
            .filter(|k| !k.is_empty())
            .cloned()
            .collect();

        Self {
            valid_keys: Arc::new(valid_keys),
        }
    }

    /// Create a Tower Layer for this authenticator
    pub fn layer(&self) -> ApiKeyAuthLayer {
        ApiKeyAuthLayer {
            auth: self.clone(),
        }
    }

    /// Validate an API key
    fn validate_key(&self, key: &str) -> bool {
        self.valid_keys.contains(key)
    }
}

/// Tower Layer for API key authentication
#[derive(Clone)]
pub struct ApiKeyAuthLayer {
    auth: ApiKeyAuth,
}

impl<S> Layer<S> for ApiKeyAuthLayer {
    type Service = ApiKeyAuthMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ApiKeyAuthMiddleware {
            inner,
            auth: self.auth.clone(),
        }
    }
}

/// API key authentication middleware service
#[derive(Clone)]
pub struct ApiKeyAuthMiddleware<S> {
    inner: S,
    auth: ApiKeyAuth,
}

impl<S> Service<Request<Body>> for ApiKeyAuthMiddleware<S>
where
    S: Service<Request<Body>, Response = Response> + Send + Clone + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let path = req.uri().path().to_string();
        let api_key = extract_api_key(&req);

        let auth = self.auth.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            match api_key {
                Some(key) if auth.validate_key(&key) => {
                    debug!(path = %path, "API key authentication successful");
                    req.extensions_mut().insert(ApiKey(key));
                    inner.call(req).await
                }
                Some(_) => {
                    warn!(path = %path, "Invalid API key");
                    Ok(unauthorized_response("Invalid API key"))
                }
                None => {
                    warn!(path = %path, "Missing API key");
                    Ok(unauthorized_response("API key required"))
                }
            }
        })
    }
}

/// Extract API key from request
fn extract_api_key<B>(req: &Request<B>) -> Option<String> {
    // Try Authorization: Bearer header
    if let Some(auth_header) = req.headers().get("authorization") {
        if let Ok(auth_str) = auth_header.to_str() {
            if let Some(token) = auth_str.strip_prefix("Bearer ") {
                return Some(token.trim().to_string());
            }
        }
    }

    // Try X-API-Key header
    if let Some(api_key_header) = req.headers().get("x-api-key") {
        if let Ok(key) = api_key_header.to_str() {
            return Some(key.trim().to_string());
        }
    }

    None
}

/// Create unauthorized response
fn unauthorized_response(message: &str) -> Response {
    let mut response = AppError::unauthorized(message).into_response();
    response
        .headers_mut()
        .insert("www-authenticate", axum::http::HeaderValue::from_static("Bearer"));
    response
}
