//! Shared types for the DLC bundle service
//!
//! This crate contains the domain types used across the bundle store,
//! configuration and service components.

pub mod bundle;
pub mod error;
pub mod utils;

// Re-export commonly used types
pub use bundle::*;
pub use error::{BundleError, ConfigError, DatabaseError, Result};
