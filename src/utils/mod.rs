//! Utility modules for the stencil compiler.
//!
//! - Error types
//! - Code formatting helpers for emitters

pub mod errors;
pub mod pretty;

// Re-exports
pub use errors::*;
pub use pretty::CodeFormatter;
