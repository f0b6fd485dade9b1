//! Application state management.
//!
//! This module defines the shared application state that is accessible
//! from all request handlers via Axum's State extractor.
//!
//! # Usage
//!
//! ```rust,ignore
//! async fn handler(State(state): State<AppState>, auth: AuthUser) -> Result<Json<Vec<FileResponse>>> {
//!     let files = state.uploads.list_files(auth.user.id)?;
//!     // ...
//! }
//! ```

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::models::RateLimitDecision;
use crate::services::{
    transport_from_config, CounterStore, DatabaseService, EmailService, EmailTransport,
    LocalObjectStore, MagicLinkService, MemoryCounterStore, ObjectStore, RateLimiter,
    SessionValidator, UploadOrchestrator,
};

/// Outbound clients shared for the lifetime of the process
#[derive(Debug, Clone)]
pub struct Clients {
    /// Multipart object storage
    pub object_store: Arc<dyn ObjectStore>,
    /// Local backend that receives part uploads; routes are mounted only when set
    pub part_store: Option<Arc<LocalObjectStore>>,
    pub email: Arc<dyn EmailTransport>,
    pub counters: Arc<dyn CounterStore>,
}

impl Clients {
    /// Construct the clients selected by configuration
    pub async fn from_config(config: &Config) -> Result<Self> {
        let store = Arc::new(
            LocalObjectStore::new(&config.storage, &config.server.base_url).await?,
        );
        let email = transport_from_config(&config.email)?;

        Ok(Self {
            object_store: store.clone(),
            part_store: Some(store),
            email,
            counters: Arc::new(MemoryCounterStore::new()),
        })
    }
}

/// Counts of one cleanup sweep
#[derive(Debug, Default, Clone, Serialize)]
pub struct CleanupReport {
    pub sessions: usize,
    pub magic_links: usize,
    pub uploads_completed: usize,
    pub uploads_aborted: usize,
    pub uploads_failed: usize,
    pub orphaned_uploads: usize,
    pub rate_limit_counters: usize,
}

/// Shared application state
///
/// This struct holds all shared resources that handlers need access to.
/// Every field is cheap to clone.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<Config>,

    /// Database service for users, sessions and file records
    pub db: DatabaseService,

    pub sessions: SessionValidator,
    pub rate_limiter: RateLimiter,
    pub uploads: UploadOrchestrator,
    pub email: EmailService,
    pub magic_links: MagicLinkService,

    /// Local part receiver, if the object store is served by this process
    pub part_store: Option<Arc<LocalObjectStore>>,
}

impl AppState {
    /// Create a new application state with clients built from configuration
    ///
    /// # Errors
    /// Returns error if services cannot be initialized
    pub async fn new(config: Config) -> Result<Self> {
        let clients = Clients::from_config(&config).await?;
        Self::with_clients(config, clients)
    }

    /// Create application state around explicitly constructed clients
    pub fn with_clients(config: Config, clients: Clients) -> Result<Self> {
        let db = DatabaseService::new(&config.storage)?;

        let sessions = SessionValidator::new(db.clone(), &config.session);
        let rate_limiter = RateLimiter::new(&config.rate_limit, clients.counters);
        let uploads = UploadOrchestrator::new(
            db.clone(),
            clients.object_store,
            config.upload.clone(),
            config.storage.presign_ttl_seconds,
        );
        let email = EmailService::new(&config.email, clients.email);
        let magic_links = MagicLinkService::new(
            db.clone(),
            sessions.clone(),
            email.clone(),
            &config.server.base_url,
            &config.magic_link,
        );

        Ok(Self {
            config: Arc::new(config),
            db,
            sessions,
            rate_limiter,
            uploads,
            email,
            magic_links,
            part_store: clients.part_store,
        })
    }

    /// Get the base URL for links
    pub fn base_url(&self) -> &str {
        &self.config.server.base_url
    }

    /// Whether cookies are marked `Secure`
    pub fn secure_cookies(&self) -> bool {
        self.config.server.production
    }

    /// Get cleanup interval in seconds
    pub fn cleanup_interval(&self) -> u64 {
        self.config.server.cleanup_interval_seconds
    }

    /// Get upload session timeout in seconds
    pub fn upload_session_timeout(&self) -> u64 {
        self.config.upload.upload_session_timeout
    }

    /// Count a request against `policy`
    ///
    /// Returns `None` when rate limiting is disabled, the decision when the
    /// request may proceed, and a 429 error otherwise.
    pub async fn enforce_rate_limit(
        &self,
        policy: &str,
        identifier: &str,
    ) -> Result<Option<RateLimitDecision>> {
        if !self.rate_limiter.is_enabled() {
            return Ok(None);
        }

        let decision = self.rate_limiter.check(policy, identifier).await?;
        if !decision.allowed {
            tracing::warn!(policy = %policy, "Rate limit exceeded");
            return Err(AppError::rate_limited(policy, decision));
        }

        Ok(Some(decision))
    }

    /// Remove expired sessions and links, settle stale uploads and evict
    /// expired rate limit counters
    ///
    /// Steps run independently; a failing step is logged and counted as zero.
    pub async fn cleanup(&self) -> Result<CleanupReport> {
        let now = Utc::now();
        let reconciled = logged("uploads", self.uploads.reconcile(now).await);

        // Store-level leftovers without a record; twice the timeout leaves
        // reconcile room to run first
        let orphan_age = Duration::from_secs(self.upload_session_timeout().saturating_mul(2));
        let orphaned_uploads = match &self.part_store {
            Some(store) => logged(
                "orphaned_uploads",
                store
                    .cleanup_stale_uploads(orphan_age)
                    .await
                    .map_err(AppError::from),
            ),
            None => 0,
        };

        let report = CleanupReport {
            sessions: logged("sessions", self.db.cleanup_expired_sessions(now)),
            magic_links: logged("magic_links", self.db.cleanup_expired_magic_links(now)),
            uploads_completed: reconciled.completed,
            uploads_aborted: reconciled.aborted,
            uploads_failed: reconciled.failed,
            orphaned_uploads,
            rate_limit_counters: logged("rate_limit_counters", self.rate_limiter.purge().await),
        };

        info!(?report, "Cleanup completed");
        Ok(report)
    }
}

fn logged<T: Default>(step: &str, result: Result<T>) -> T {
    result.unwrap_or_else(|e| {
        warn!(step, error = %e, "Cleanup step failed");
        T::default()
    })
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &"<Config>")
            .field("db", &"<DatabaseService>")
            .field("rate_limiter_enabled", &self.rate_limiter.is_enabled())
            .field("part_store", &self.part_store.is_some())
            .finish()
    }
}
