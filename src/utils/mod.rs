//! Utility functions shared across the codebase

pub mod text;

// Re-export commonly used utilities
pub use text::{non_blank, truncate_chars};
