//! Session authentication for user-facing endpoints.
//!
//! Identity is resolved once per request by the [`AuthUser`] extractor from
//! the `session` cookie or an `Authorization: Bearer` header, and handed to
//! the handler explicitly.
//!
//! When validation renews a cookie session, [`SessionRenewalLayer`] sends
//! the cookie again with a fresh `Max-Age`.

use axum::{
    body::Body,
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap, HeaderValue, Request},
    response::Response,
};
use std::{
    sync::{Arc, OnceLock},
    task::{Context, Poll},
};
use tower::{Layer, Service};

use crate::error::AppError;
use crate::models::{Session, User};
use crate::state::AppState;

/// Name of the session cookie
pub const SESSION_COOKIE: &str = "session";

/// Authenticated caller
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user: User,
    pub session: Session,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let from_cookie = cookie_token(&parts.headers);
        let token = from_cookie.clone().or_else(|| bearer_token(&parts.headers));

        let Some(validated) = state.sessions.validate(token.as_deref())? else {
            return Err(AppError::unauthorized("Sign in required"));
        };

        // Bearer clients track expiry through the session endpoint
        if validated.renewed {
            let slot = parts.extensions.get::<RenewedCookie>();
            if let (Some(token), Some(slot)) = (from_cookie, slot) {
                let cookie =
                    session_cookie(&token, state.sessions.lifetime(), state.secure_cookies());
                let _ = slot.0.set(cookie);
            }
        }

        Ok(Self {
            user: validated.user,
            session: validated.session,
        })
    }
}

/// Raw session token from the cookie, falling back to a bearer header
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    cookie_token(headers).or_else(|| bearer_token(headers))
}

fn cookie_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

/// Cookie to send back after a renewal, filled in by [`AuthUser`]
#[derive(Debug, Clone, Default)]
struct RenewedCookie(Arc<OnceLock<HeaderValue>>);

/// Tower Layer that re-issues renewed session cookies
#[derive(Debug, Clone, Default)]
pub struct SessionRenewalLayer;

impl<S> Layer<S> for SessionRenewalLayer {
    type Service = SessionRenewalMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        SessionRenewalMiddleware { inner }
    }
}

/// Session renewal middleware service
#[derive(Debug, Clone)]
pub struct SessionRenewalMiddleware<S> {
    inner: S,
}

impl<S> Service<Request<Body>> for SessionRenewalMiddleware<S>
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
        let slot = RenewedCookie::default();
        req.extensions_mut().insert(slot.clone());

        let mut inner = self.inner.clone();

        Box::pin(async move {
            let mut response = inner.call(req).await?;

            // A handler that sets the cookie itself (login, logout) wins
            if let Some(cookie) = slot.0.get() {
                if !response.headers().contains_key(header::SET_COOKIE) {
                    response
                        .headers_mut()
                        .insert(header::SET_COOKIE, cookie.clone());
                }
            }

            Ok(response)
        })
    }
}

/// `Set-Cookie` value carrying a new session token
pub fn session_cookie(token: &str, max_age: chrono::Duration, secure: bool) -> HeaderValue {
    build_cookie(token, max_age.num_seconds(), secure)
}

/// `Set-Cookie` value that removes the session cookie
pub fn clear_session_cookie(secure: bool) -> HeaderValue {
    build_cookie("", 0, secure)
}

fn build_cookie(value: &str, max_age: i64, secure: bool) -> HeaderValue {
    let mut cookie = format!(
        "{}={}; HttpOnly; SameSite=Lax; Path=/; Max-Age={}",
        SESSION_COOKIE, value, max_age
    );
    if secure {
        cookie.push_str("; Secure");
    }

    // Tokens are hex, so the cookie is always a valid header value
    HeaderValue::from_str(&cookie).unwrap_or_else(|_| HeaderValue::from_static("session=; Max-Age=0"))
}
