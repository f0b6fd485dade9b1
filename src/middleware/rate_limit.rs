//! Rate limiting middleware.
//!
//! Applies the `api` policy of the sliding-window [`RateLimiter`] to every
//! request, keyed by client IP. Forwarding headers are read only when the
//! layer is told to trust them. Allowed responses carry the
//! `X-RateLimit-*` headers; denied requests get a JSON 429 with
//! `Retry-After`.
//!
//! # Example
//!
//! ```rust,ignore
//! let limiter = RateLimiter::in_memory(&config.rate_limit);
//! let app = Router::new()
//!     .route("/api/files", get(list_files))
//!     .layer(RateLimitLayer::new(limiter, API_POLICY, false));
//! ```

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::Request,
    response::{IntoResponse, Response},
};
use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
    task::{Context, Poll},
};
use tower::{Layer, Service};
use tracing::warn;

use crate::error::AppError;
use crate::services::RateLimiter;

/// Tower Layer for rate limiting
#[derive(Clone)]
pub struct RateLimitLayer {
    rate_limiter: RateLimiter,
    policy: Arc<str>,
    trust_forwarded: bool,
}

impl RateLimitLayer {
    pub fn new(rate_limiter: RateLimiter, policy: &str, trust_forwarded: bool) -> Self {
        Self {
            rate_limiter,
            policy: Arc::from(policy),
            trust_forwarded,
        }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitMiddleware {
            inner,
            rate_limiter: self.rate_limiter.clone(),
            policy: self.policy.clone(),
            trust_forwarded: self.trust_forwarded,
        }
    }
}

/// Rate limiting middleware service
#[derive(Clone)]
pub struct RateLimitMiddleware<S> {
    inner: S,
    rate_limiter: RateLimiter,
    policy: Arc<str>,
    trust_forwarded: bool,
}

impl<S> Service<Request<Body>> for RateLimitMiddleware<S>
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

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let mut inner = self.inner.clone();

        if !self.rate_limiter.is_enabled() {
            return Box::pin(async move { inner.call(req).await });
        }

        let ip = extract_client_ip(&req, self.trust_forwarded);
        let rate_limiter = self.rate_limiter.clone();
        let policy = self.policy.clone();

        Box::pin(async move {
            let decision = match rate_limiter.check(&policy, &ip.to_string()).await {
                Ok(decision) => decision,
                Err(e) => return Ok(e.into_response()),
            };

            if !decision.allowed {
                warn!(ip = %ip, policy = %policy, "Rate limit exceeded");
                return Ok(AppError::rate_limited(policy.as_ref(), decision).into_response());
            }

            let mut response = inner.call(req).await?;

            // Headers of a route-level policy take precedence
            if !response.headers().contains_key("x-ratelimit-limit") {
                decision.apply_headers(response.headers_mut());
            }
            Ok(response)
        })
    }
}

/// Extract client IP from request
///
/// Forwarding headers are client-controlled unless a proxy rewrites them, so
/// they are consulted only when `trust_forwarded` is set.
pub fn extract_client_ip<B>(req: &Request<B>, trust_forwarded: bool) -> IpAddr {
    if trust_forwarded {
        if let Some(ip) = forwarded_ip(req) {
            return ip;
        }
    }

    // Try to get from connection info (requires into_make_service_with_connect_info)
    if let Some(connect_info) = req.extensions().get::<ConnectInfo<SocketAddr>>() {
        return connect_info.0.ip();
    }

    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn forwarded_ip<B>(req: &Request<B>) -> Option<IpAddr> {
    // Try X-Forwarded-For header first, taking the first IP in the chain
    let forwarded = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .and_then(|first| first.trim().parse::<IpAddr>().ok());

    forwarded.or_else(|| {
        req.headers()
            .get("x-real-ip")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<IpAddr>().ok())
    })
}
