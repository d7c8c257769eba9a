//! Service Module
//!
//! Storage logic for the artifact store.

pub mod artifact;

// Re-export for convenience
pub use artifact as artifact_service;
