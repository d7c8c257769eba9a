//! Kiln Core
//!
//! Core types and pure build logic for the Kiln package build system.
//!
//! This crate contains:
//! - Domain types: build properties, styles, artifact categories, steps and pipelines
//! - Command rendering: property set -> command argument vectors
//! - Step conditions: run and visibility predicates
//! - Artifact routing: store paths and mirrored public URLs
//! - Pipeline templates: the tarball and package-builder pipelines
//! - Fan-out: downstream run requests for each target environment
//! - DTOs: run requests and reports exchanged between components

pub mod condition;
pub mod domain;
pub mod dto;
pub mod error;
pub mod fanout;
pub mod render;
pub mod router;
pub mod templates;

pub use error::{CoreError, Result};
