//! Kiln HTTP Client
//!
//! A small, type-safe HTTP client for the Kiln artifact store.
//!
//! The runner uses it to upload tarballs and package repositories and to
//! download tarballs into package-builder workspaces; the CLI uses it to check
//! store health.
//!
//! # Example
//!
//! ```no_run
//! use kiln_client::StoreClient;
//! use kiln_core::domain::properties::BuildProperties;
//! use kiln_core::router;
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = StoreClient::new("http://localhost:8010");
//!     let props = BuildProperties::from_pairs([
//!         ("category", "patchset"),
//!         ("change", "123"),
//!         ("patchset", "4"),
//!         ("tarball", "lustre-2.10.tar.gz"),
//!         ("bbmaster", "build.example.org"),
//!     ])?;
//!
//!     let location = router::tarball_location(&props)?;
//!     client.upload_file(Path::new("lustre-2.10.tar.gz"), &location).await?;
//!     Ok(())
//! }
//! ```

mod artifacts;
pub mod error;

// Re-export commonly used types
pub use error::{ClientError, Result};

use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;

/// Body of the store's health endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
}

/// HTTP client for the Kiln artifact store
#[derive(Debug, Clone)]
pub struct StoreClient {
    /// Base URL of the store (e.g., "http://localhost:8010")
    base_url: String,
    /// HTTP client instance
    client: Client,
}

impl StoreClient {
    /// Create a new store client
    ///
    /// # Example
    /// ```
    /// use kiln_client::StoreClient;
    ///
    /// let client = StoreClient::new("http://localhost:8010");
    /// ```
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create a new store client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Get the base URL of the store
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Check that the store is up
    pub async fn health(&self) -> Result<HealthStatus> {
        let url = format!("{}/health", self.base_url);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Handle an API response and deserialize JSON
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let response = self.check_status(response).await?;

        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }

    /// Turns a non-success status into an `ApiError` carrying the body text
    async fn check_status(&self, response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        Ok(response)
    }
}
