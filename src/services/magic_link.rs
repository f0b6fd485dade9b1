//! Passwordless login by emailed link.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::config::MagicLinkConfig;
use crate::error::{AppError, Result};
use crate::models::{
    hash_token, normalize_email, EmailTemplate, MagicLink, SessionToken, ValidatedSession,
};
use crate::services::{DatabaseService, EmailService, SessionValidator};

#[derive(Debug, Clone)]
pub struct MagicLinkService {
    db: DatabaseService,
    sessions: SessionValidator,
    email: EmailService,
    base_url: String,
    ttl: chrono::Duration,
}

impl MagicLinkService {
    pub fn new(
        db: DatabaseService,
        sessions: SessionValidator,
        email: EmailService,
        base_url: &str,
        config: &MagicLinkConfig,
    ) -> Self {
        Self {
            db,
            sessions,
            email,
            base_url: base_url.to_string(),
            ttl: chrono::Duration::minutes(i64::from(config.ttl_minutes)),
        }
    }

    /// Email a login link to `email`, creating the user on first contact
    ///
    /// Returns the normalized address. The outcome is the same whether or
    /// not the user existed.
    pub fn request(&self, email: &str) -> Result<String> {
        let email =
            normalize_email(email).ok_or_else(|| AppError::validation("Invalid email address"))?;

        let (user, created) = self.db.find_or_insert_user(&email)?;
        if created {
            info!(user_id = %user.id, "Created user from login request");
        }

        let token = SessionToken::generate();
        let link = MagicLink {
            id: token.hashed(),
            email: email.clone(),
            expires_at: Utc::now() + self.ttl,
        };
        self.db.insert_magic_link(&link)?;

        let url = format!(
            "{}/api/auth/magic-link/verify?token={}",
            self.base_url,
            token.as_str()
        );
        self.email.enqueue(&email, EmailTemplate::MagicLink { url });

        debug!(expires_at = %link.expires_at, "Issued magic link");
        Ok(email)
    }

    /// Exchange a link token for a new session
    pub fn verify(&self, raw_token: &str) -> Result<(SessionToken, ValidatedSession)> {
        self.verify_at(raw_token, Utc::now())
    }

    /// [`MagicLinkService::verify`] with an explicit clock
    pub fn verify_at(
        &self,
        raw_token: &str,
        now: DateTime<Utc>,
    ) -> Result<(SessionToken, ValidatedSession)> {
        let invalid = || AppError::unauthorized("Login link is invalid or expired");

        if raw_token.is_empty() {
            return Err(invalid());
        }

        // Taken before the expiry check so a link never works twice
        let link = self
            .db
            .take_magic_link(&hash_token(raw_token))?
            .ok_or_else(invalid)?;

        if link.is_expired_at(now) {
            return Err(invalid());
        }

        let mut user = self.db.find_user_by_email(&link.email)?.ok_or_else(invalid)?;

        if !user.email_verified {
            user.email_verified = true;
            self.db.update_user(&user)?;
            self.email
                .enqueue(&user.email, EmailTemplate::Welcome { name: None });
        }

        let (token, session) = self.sessions.create(user.id)?;
        info!(user_id = %user.id, "Signed in with magic link");

        Ok((
            token,
            ValidatedSession {
                session,
                user,
                renewed: false,
            },
        ))
    }
}
