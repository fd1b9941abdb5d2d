//! Utility modules for the schedule engine.
//!
//! - Error types
//! - Pretty printing helpers

pub mod errors;
pub mod pretty;

// Re-exports
pub use errors::*;
pub use pretty::PrettyPrint;
