//! User account model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Account role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Admin,
}

/// An external identity linked to the account (social login)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedAccount {
    /// Provider name, e.g. `github`
    pub provider: String,
    /// Account id at the provider
    pub provider_account_id: String,
}

/// User account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,

    /// Normalized (trimmed, lowercase) email address
    pub email: String,

    /// Set once the user proved ownership of the address
    pub email_verified: bool,

    pub role: Role,

    #[serde(default)]
    pub linked_accounts: Vec<LinkedAccount>,

    /// Password hash; `None` for passwordless accounts
    #[serde(default)]
    pub password_hash: Option<String>,

    pub created_at: DateTime<Utc>,
}

impl User {
    /// Create a new passwordless, unverified user
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: email.into(),
            email_verified: false,
            role: Role::User,
            linked_accounts: Vec::new(),
            password_hash: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Normalize an email address, returning `None` when it is obviously invalid
pub fn normalize_email(raw: &str) -> Option<String> {
    let email = raw.trim().to_lowercase();
    let (local, domain) = email.split_once('@')?;

    if local.is_empty()
        || domain.len() < 3
        || !domain.contains('.')
        || domain.starts_with('.')
        || domain.ends_with('.')
        || email.chars().any(char::is_whitespace)
        || domain.contains('@')
    {
        return None;
    }

    Some(email)
}

/// Public view of a user (never exposes the password hash)
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub email: String,
    pub email_verified: bool,
    pub role: Role,
    pub providers: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for UserResponse {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            email_verified: user.email_verified,
            role: user.role,
            providers: user
                .linked_accounts
                .iter()
                .map(|account| account.provider.clone())
                .collect(),
            created_at: user.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_email() {
        assert_eq!(
            normalize_email("  Alice@Example.COM "),
            Some("alice@example.com".to_string())
        );
        assert_eq!(normalize_email("no-at-sign"), None);
        assert_eq!(normalize_email("@example.com"), None);
        assert_eq!(normalize_email("bob@localhost"), None);
        assert_eq!(normalize_email("bob@exa mple.com"), None);
        assert_eq!(normalize_email("a@b@c.com"), None);
    }

    #[test]
    fn test_response_hides_password() {
        let mut user = User::new("carol@example.com");
        user.password_hash = Some("hash".to_string());
        user.linked_accounts.push(LinkedAccount {
            provider: "github".to_string(),
            provider_account_id: "42".to_string(),
        });

        let json = serde_json::to_value(UserResponse::from(&user)).unwrap();
        assert!(json.get("password_hash").is_none());
        assert_eq!(json["providers"][0], "github");
        assert_eq!(json["role"], "user");
    }
}
