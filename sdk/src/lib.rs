//! Sakhi SDK
//!
//! Shared error taxonomy for Sakhi components.

/// Error types and handling
pub mod errors;

pub use errors::{EngineError, ErrorClass, ErrorExt};
