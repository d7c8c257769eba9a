//! Core domain types
//!
//! This module contains the domain structures shared by the runner (which
//! executes pipelines), the CLI (which inspects them) and the artifact store.
//! Pipelines and steps are built once at configuration time and read-only
//! afterwards; build properties live for a single run.

pub mod category;
pub mod log;
pub mod pipeline;
pub mod properties;
pub mod step;
pub mod style;
pub mod target;
