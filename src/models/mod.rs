//! Data models for the SaaS API server.
//!
//! This module contains all domain models and data transfer objects (DTOs)
//! used throughout the application.

mod email;
mod file;
mod rate_limit;
mod session;
mod user;

pub use email::*;
pub use file::*;
pub use rate_limit::*;
pub use session::*;
pub use user::*;
