//! Configuration module
//!
//! Handles CLI configuration: where the artifact store and helper scripts
//! live and which repository the tarball pipeline builds.

/// CLI configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// URL of the artifact store service
    pub store_url: String,
    /// Base URL of the remote helper scripts
    pub script_base_url: String,
    /// Source repository of the tarball pipeline
    pub repo_url: String,
}
