//! Authentication session and magic link models.
//!
//! Raw tokens only ever exist in memory and in the client's cookie. What is
//! persisted is the SHA-256 digest of the token, so a leaked database cannot
//! be replayed against the API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

use super::{User, UserResponse};

/// Opaque token handed to the client
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Generate a fresh token from 32 bytes of OS randomness
    pub fn generate() -> Self {
        use rand::{rngs::OsRng, RngCore};

        let mut bytes = [0_u8; 32];
        OsRng.fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lookup key under which the token is persisted
    pub fn hashed(&self) -> String {
        hash_token(&self.0)
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionToken(**redacted**)")
    }
}

/// One-way transform of a raw token into its storage key
pub fn hash_token(raw: &str) -> String {
    hex::encode(Sha256::digest(raw.as_bytes()))
}

/// Server-side session record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// SHA-256 hex digest of the raw token
    pub id: String,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn new(token: &SessionToken, user_id: Uuid, lifetime: chrono::Duration) -> Self {
        let now = Utc::now();

        Self {
            id: token.hashed(),
            user_id,
            created_at: now,
            expires_at: now + lifetime,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Whether less than `threshold` is left before expiry
    pub fn needs_renewal_at(&self, now: DateTime<Utc>, threshold: chrono::Duration) -> bool {
        now >= self.expires_at - threshold
    }
}

/// A session that passed validation together with its user
#[derive(Debug, Clone)]
pub struct ValidatedSession {
    pub session: Session,
    pub user: User,
    /// Expiry was extended by this validation; cookies need re-issuing
    pub renewed: bool,
}

/// Single-use login link record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MagicLink {
    /// SHA-256 hex digest of the emailed token
    pub id: String,
    pub email: String,
    pub expires_at: DateTime<Utc>,
}

impl MagicLink {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Request DTO for a magic link
#[derive(Debug, Deserialize)]
pub struct MagicLinkRequest {
    pub email: String,
}

/// Query of the verification link
#[derive(Debug, Deserialize)]
pub struct MagicLinkVerifyQuery {
    pub token: String,
}

/// Current session as returned to the client
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub user: UserResponse,
    pub expires_at: DateTime<Utc>,
}

impl From<&ValidatedSession> for SessionResponse {
    fn from(validated: &ValidatedSession) -> Self {
        Self {
            user: UserResponse::from(&validated.user),
            expires_at: validated.session.expires_at,
        }
    }
}
