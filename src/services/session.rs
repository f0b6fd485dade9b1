//! Session validation.
//!
//! `validate` is the hot path of every authenticated request. It performs at
//! most one write: deleting an expired (or orphaned) session, or extending one
//! that entered the renewal window. A plain valid read never writes.
//!
//! Database failures are returned to the caller as-is; nothing here retries.

use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::error::Result;
use crate::models::{hash_token, Session, SessionToken, ValidatedSession};
use crate::services::DatabaseService;

/// Creates, validates and revokes sessions
#[derive(Debug, Clone)]
pub struct SessionValidator {
    db: DatabaseService,
    lifetime: chrono::Duration,
    renew_threshold: chrono::Duration,
}

impl SessionValidator {
    pub fn new(db: DatabaseService, config: &SessionConfig) -> Self {
        Self {
            db,
            lifetime: config.lifetime(),
            renew_threshold: config.renew_threshold(),
        }
    }

    /// Session lifetime, also used as the cookie `Max-Age`
    pub fn lifetime(&self) -> chrono::Duration {
        self.lifetime
    }

    /// Create a session for `user_id`; the raw token is returned exactly once
    pub fn create(&self, user_id: Uuid) -> Result<(SessionToken, Session)> {
        let token = SessionToken::generate();
        let session = Session::new(&token, user_id, self.lifetime);

        self.db.insert_session(&session)?;

        info!(user_id = %user_id, expires_at = %session.expires_at, "Created session");
        Ok((token, session))
    }

    /// Validate a raw token against the store
    ///
    /// Returns `Ok(None)` for absent, unknown or expired tokens.
    pub fn validate(&self, raw_token: Option<&str>) -> Result<Option<ValidatedSession>> {
        self.validate_at(raw_token, Utc::now())
    }

    /// [`SessionValidator::validate`] with an explicit clock
    pub fn validate_at(
        &self,
        raw_token: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Option<ValidatedSession>> {
        let Some(raw_token) = raw_token.filter(|t| !t.is_empty()) else {
            return Ok(None);
        };

        let Some(session) = self.db.get_session(&hash_token(raw_token))? else {
            return Ok(None);
        };

        if session.is_expired_at(now) {
            self.db.delete_session(&session)?;
            debug!(user_id = %session.user_id, "Deleted expired session");
            return Ok(None);
        }

        let Some(user) = self.db.get_user(session.user_id)? else {
            self.db.delete_session(&session)?;
            debug!(user_id = %session.user_id, "Deleted session of missing user");
            return Ok(None);
        };

        if !session.needs_renewal_at(now, self.renew_threshold) {
            return Ok(Some(ValidatedSession {
                session,
                user,
                renewed: false,
            }));
        }

        let mut renewed = session.clone();
        renewed.expires_at = now + self.lifetime;
        self.db.update_session_expiry(&session, &renewed)?;
        debug!(user_id = %renewed.user_id, expires_at = %renewed.expires_at, "Renewed session");

        Ok(Some(ValidatedSession {
            session: renewed,
            user,
            renewed: true,
        }))
    }

    /// Delete the session behind a raw token (logout)
    ///
    /// Returns whether a session existed.
    pub fn invalidate(&self, raw_token: &str) -> Result<bool> {
        match self.db.get_session(&hash_token(raw_token))? {
            Some(session) => {
                self.db.delete_session(&session)?;
                info!(user_id = %session.user_id, "Invalidated session");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Delete every session of a user
    pub fn invalidate_all(&self, user_id: Uuid) -> Result<usize> {
        let count = self.db.delete_user_sessions(user_id)?;
        info!(user_id = %user_id, count, "Invalidated all sessions of user");
        Ok(count)
    }
}
