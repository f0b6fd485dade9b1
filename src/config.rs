//! Configuration module for the SaaS API server.
//!
//! This module handles loading and validating configuration from TOML files.
//! Configuration can be loaded from a file path or from default locations.
//!
//! # Configuration Sources (in order of priority)
//! 1. `config.local.toml` - Local overrides (gitignored)
//! 2. `config.toml` - Main configuration file
//!
//! # Example
//! ```rust,ignore
//! let config = Config::load("config.toml")?;
//! println!("Server will listen on {}:{}", config.server.host, config.server.port);
//! ```

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Policy applied to every public request by the rate limit layer, keyed by client IP.
pub const API_POLICY: &str = "api";
/// Policy for starting uploads, keyed by user id.
pub const UPLOAD_POLICY: &str = "upload";
/// Policy for requesting login links, keyed by email address.
pub const MAGIC_LINK_POLICY: &str = "magic_link";
/// Policy for the email-send endpoint, keyed by API key.
pub const EMAIL_POLICY: &str = "email";

/// Policies that must be configured when rate limiting is enabled
pub const REQUIRED_POLICIES: [&str; 4] = [API_POLICY, UPLOAD_POLICY, MAGIC_LINK_POLICY, EMAIL_POLICY];

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub magic_link: MagicLinkConfig,
    pub upload: UploadConfig,
    pub rate_limit: RateLimitConfig,
    pub email: EmailConfig,
    pub logging: LoggingConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

/// API keys for server-to-server endpoints (email sending)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    /// List of valid API keys; with none configured those endpoints reject every call
    #[serde(default)]
    pub api_keys: Vec<String>,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host to bind the public API to
    pub host: String,
    /// Port for the public API
    pub port: u16,
    /// Host to bind the admin API to (should be localhost)
    pub admin_host: String,
    /// Port for the admin API
    pub admin_port: u16,
    /// Public base URL, used for magic links and presigned part URLs
    pub base_url: String,
    /// Production mode marks cookies `Secure`
    #[serde(default)]
    pub production: bool,
    /// Maximum accepted request body in bytes
    pub max_body_size: usize,
    /// Interval of the cleanup sweep in seconds
    pub cleanup_interval_seconds: u64,
    /// Take the client IP from `X-Forwarded-For` / `X-Real-IP`; enable only
    /// behind a reverse proxy that overwrites them
    #[serde(default)]
    pub trust_forwarded_headers: bool,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Base directory for all data
    pub data_dir: PathBuf,
    /// Directory for completed objects (relative to data_dir)
    pub objects_dir: String,
    /// Directory for in-flight multipart parts (relative to data_dir)
    pub temp_dir: String,
    /// Number of directory nesting levels for object storage (0-4)
    #[serde(default = "default_directory_levels")]
    pub directory_levels: u8,
    /// Secret used to sign part upload URLs
    pub signing_secret: String,
    /// Lifetime of a signed part URL in seconds
    #[serde(default = "default_presign_ttl")]
    pub presign_ttl_seconds: u64,
}

fn default_directory_levels() -> u8 {
    2
}

fn default_presign_ttl() -> u64 {
    3600
}

impl StorageConfig {
    /// Get the full path to the objects directory
    pub fn objects_path(&self) -> PathBuf {
        self.data_dir.join(&self.objects_dir)
    }

    /// Get the full path to the temp directory
    pub fn temp_path(&self) -> PathBuf {
        self.data_dir.join(&self.temp_dir)
    }

    /// Get the full path to the database directory
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("rocksdb")
    }
}

/// Session lifetime configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Total session lifetime in days
    #[serde(default = "default_lifetime_days")]
    pub lifetime_days: u32,
    /// Sessions with less than this many days left are extended on access
    #[serde(default = "default_renew_threshold_days")]
    pub renew_threshold_days: u32,
}

fn default_lifetime_days() -> u32 {
    30
}

fn default_renew_threshold_days() -> u32 {
    15
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            lifetime_days: default_lifetime_days(),
            renew_threshold_days: default_renew_threshold_days(),
        }
    }
}

impl SessionConfig {
    pub fn lifetime(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.lifetime_days))
    }

    pub fn renew_threshold(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.renew_threshold_days))
    }
}

/// Magic link configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MagicLinkConfig {
    /// Lifetime of an emailed login link in minutes
    #[serde(default = "default_magic_link_ttl")]
    pub ttl_minutes: u32,
}

fn default_magic_link_ttl() -> u32 {
    15
}

impl Default for MagicLinkConfig {
    fn default() -> Self {
        Self {
            ttl_minutes: default_magic_link_ttl(),
        }
    }
}

/// Upload configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    /// Maximum file size (bytes)
    pub max_file_size: u64,
    /// Size of every multipart part except the last one (bytes)
    pub part_size: u64,
    /// Allowed MIME types
    pub allowed_content_types: Vec<String>,
    /// Uploads idle for longer than this are reconciled by the cleanup sweep
    pub upload_session_timeout: u64,
}

impl UploadConfig {
    /// Check if a MIME type is allowed
    pub fn is_allowed_type(&self, content_type: &str) -> bool {
        self.allowed_content_types.iter().any(|t| t == content_type)
    }

    /// Number of parts a file of `size` bytes is split into
    pub fn part_count(&self, size: u64) -> u64 {
        size.div_ceil(self.part_size).max(1)
    }
}

/// Rate limiting configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Enable rate limiting
    pub enabled: bool,
    /// Named policies
    #[serde(default)]
    pub policies: HashMap<String, RateLimitPolicy>,
}

/// A single sliding-window policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RateLimitPolicy {
    /// Maximum requests per window
    pub limit: u32,
    /// Window duration in seconds
    pub window_seconds: u64,
}

impl RateLimitPolicy {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }
}

/// Which email transport to construct
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailProvider {
    /// Hosted email API over HTTPS
    Http,
    /// Write rendered messages to the log (development)
    Log,
}

/// Email configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    pub provider: EmailProvider,
    /// Endpoint of the hosted email API
    #[serde(default)]
    pub api_url: String,
    /// API key of the hosted email API
    #[serde(default)]
    pub api_key: String,
    /// Sender address
    pub from: String,
    /// Delivery attempts per message, including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry; doubled after every failure
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    /// HTTP client timeout in seconds
    #[serde(default = "default_email_timeout")]
    pub timeout_seconds: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    500
}

fn default_email_timeout() -> u64 {
    10
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

impl Config {
    /// Load configuration from a file path
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed or validated
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from default locations
    ///
    /// Tries to load from:
    /// 1. `config.local.toml` (if exists)
    /// 2. `config.toml`
    pub fn load_default() -> Result<Self, ConfigError> {
        if Path::new("config.local.toml").exists() {
            return Self::load("config.local.toml");
        }

        if Path::new("config.toml").exists() {
            return Self::load("config.toml");
        }

        Err(ConfigError::ValidationError(
            "No configuration file found. Expected config.toml or config.local.toml".to_string(),
        ))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.base_url.ends_with('/') {
            return Err(ConfigError::ValidationError(
                "base_url should not have a trailing slash".to_string(),
            ));
        }

        if self.storage.directory_levels > 4 {
            return Err(ConfigError::ValidationError(
                "directory_levels must be between 0 and 4".to_string(),
            ));
        }

        if self.storage.signing_secret.len() < 16 {
            return Err(ConfigError::ValidationError(
                "signing_secret must be at least 16 characters".to_string(),
            ));
        }

        if self.session.lifetime_days == 0
            || self.session.renew_threshold_days >= self.session.lifetime_days
        {
            return Err(ConfigError::ValidationError(
                "renew_threshold_days must be positive and less than lifetime_days".to_string(),
            ));
        }

        if self.upload.part_size < 1024 {
            return Err(ConfigError::ValidationError(
                "part_size must be at least 1024 bytes".to_string(),
            ));
        }

        if (self.server.max_body_size as u64) < self.upload.part_size {
            return Err(ConfigError::ValidationError(
                "max_body_size must be at least part_size so parts fit in one request".to_string(),
            ));
        }

        if self.upload.part_count(self.upload.max_file_size) > 10_000 {
            return Err(ConfigError::ValidationError(
                "max_file_size / part_size must not exceed 10000 parts".to_string(),
            ));
        }

        for (name, policy) in &self.rate_limit.policies {
            if policy.limit == 0 || policy.window_seconds == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "rate limit policy '{}' needs a positive limit and window",
                    name
                )));
            }
        }

        if self.rate_limit.enabled {
            if let Some(missing) = REQUIRED_POLICIES
                .iter()
                .find(|name| !self.rate_limit.policies.contains_key(**name))
            {
                return Err(ConfigError::ValidationError(format!(
                    "rate limiting is enabled but the '{}' policy is missing",
                    missing
                )));
            }
        }

        if self.email.provider == EmailProvider::Http
            && (self.email.api_url.is_empty() || self.email.api_key.is_empty())
        {
            return Err(ConfigError::ValidationError(
                "email.api_url and email.api_key are required for the http provider".to_string(),
            ));
        }

        if self.email.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "email.max_attempts must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [server]
        host = "0.0.0.0"
        port = 3000
        admin_host = "127.0.0.1"
        admin_port = 3001
        base_url = "http://localhost:3000"
        max_body_size = 10485760
        cleanup_interval_seconds = 300

        [storage]
        data_dir = "./data"
        objects_dir = "objects"
        temp_dir = "temp"
        signing_secret = "0123456789abcdef0123"

        [upload]
        max_file_size = 104857600
        part_size = 5242880
        allowed_content_types = ["image/png", "application/pdf"]
        upload_session_timeout = 86400

        [rate_limit]
        enabled = true

        [rate_limit.policies.api]
        limit = 100
        window_seconds = 60

        [rate_limit.policies.upload]
        limit = 20
        window_seconds = 3600

        [rate_limit.policies.magic_link]
        limit = 5
        window_seconds = 600

        [rate_limit.policies.email]
        limit = 50
        window_seconds = 60

        [email]
        provider = "log"
        from = "noreply@example.com"

        [logging]
        level = "info"
        format = "pretty"
    "#;

    #[test]
    fn test_parse_sample() {
        let config = Config::parse(SAMPLE).unwrap();

        assert_eq!(config.session.lifetime_days, 30);
        assert_eq!(config.session.renew_threshold_days, 15);
        assert_eq!(config.magic_link.ttl_minutes, 15);
        assert_eq!(config.storage.directory_levels, 2);
        assert_eq!(config.email.provider, EmailProvider::Log);
        assert_eq!(config.email.max_attempts, 3);
        assert_eq!(
            config.rate_limit.policies["magic_link"],
            RateLimitPolicy {
                limit: 5,
                window_seconds: 600
            }
        );
        assert!(config.auth.api_keys.is_empty());
    }

    #[test]
    fn test_missing_api_policy_rejected() {
        let without_api = SAMPLE.replace("[rate_limit.policies.api]", "[rate_limit.policies.other]");
        let err = Config::parse(&without_api).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_http_provider_requires_credentials() {
        let http = SAMPLE.replace("provider = \"log\"", "provider = \"http\"");
        assert!(Config::parse(&http).is_err());
    }

    #[test]
    fn test_storage_paths() {
        let config = Config::parse(SAMPLE).unwrap();

        assert_eq!(config.storage.objects_path(), PathBuf::from("./data/objects"));
        assert_eq!(config.storage.temp_path(), PathBuf::from("./data/temp"));
        assert_eq!(config.storage.database_path(), PathBuf::from("./data/rocksdb"));
    }

    #[test]
    fn test_part_count() {
        let config = Config::parse(SAMPLE).unwrap();
        let part = config.upload.part_size;

        assert_eq!(config.upload.part_count(1), 1);
        assert_eq!(config.upload.part_count(part), 1);
        assert_eq!(config.upload.part_count(part + 1), 2);
        assert!(config.upload.is_allowed_type("image/png"));
        assert!(!config.upload.is_allowed_type("text/html"));
    }
}
