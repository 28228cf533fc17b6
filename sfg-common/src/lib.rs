//! # SFG Common Library
//!
//! Shared code for the seafloor-geodesy processing workspace:
//! - Error types
//! - Configuration loading and root folder resolution
//! - Logging context with runtime level and output control
//! - Catalog database initialization

pub mod config;
#[cfg(feature = "sqlx")]
pub mod db;
pub mod error;
pub mod logging;

pub use error::{Error, Result};
pub use logging::LogContext;
