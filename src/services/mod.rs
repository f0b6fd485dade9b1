//! Service layer for the SaaS API server.
//!
//! This module contains business logic services that handle:
//! - Database operations
//! - Session validation and renewal
//! - Sliding-window rate limiting
//! - Multipart object storage and upload orchestration
//! - Email delivery and magic link login

pub mod database;
pub mod email;
pub mod magic_link;
pub mod rate_limit;
pub mod session;
pub mod storage;
pub mod uploads;

pub use database::DatabaseService;
pub use email::{
    transport_from_config, EmailError, EmailService, EmailTransport, HttpEmailTransport,
    LogTransport, MemoryTransport,
};
pub use magic_link::MagicLinkService;
pub use rate_limit::{CounterStore, MemoryCounterStore, RateLimiter};
pub use session::SessionValidator;
pub use storage::{LocalObjectStore, ObjectStore, StorageError};
pub use uploads::{ReconcileReport, UploadOrchestrator};
