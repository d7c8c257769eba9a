//! Artifact transfer service
//!
//! Moves files between a run's workspace and the artifact store.

use anyhow::{Context, Result};
use async_trait::async_trait;
use kiln_client::StoreClient;
use kiln_core::router::ArtifactLocation;
use std::path::Path;

/// Service trait for store uploads and downloads
#[async_trait]
pub trait ArtifactTransfer: Send + Sync {
    async fn upload_file(&self, local: &Path, location: &ArtifactLocation) -> Result<()>;

    /// Recursive upload; returns the number of files sent
    async fn upload_directory(&self, local: &Path, location: &ArtifactLocation) -> Result<usize>;

    /// Returns the number of bytes written
    async fn download_file(&self, location: &ArtifactLocation, local: &Path) -> Result<u64>;
}

/// Transfers through the store's HTTP API
pub struct StoreTransfer {
    client: StoreClient,
}

impl StoreTransfer {
    pub fn new(client: StoreClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ArtifactTransfer for StoreTransfer {
    async fn upload_file(&self, local: &Path, location: &ArtifactLocation) -> Result<()> {
        self.client
            .upload_file(local, location)
            .await
            .with_context(|| format!("Failed to upload {} to {}", local.display(), location.path()))
    }

    async fn upload_directory(&self, local: &Path, location: &ArtifactLocation) -> Result<usize> {
        self.client
            .upload_directory(local, location)
            .await
            .with_context(|| format!("Failed to upload {} to {}", local.display(), location.path()))
    }

    async fn download_file(&self, location: &ArtifactLocation, local: &Path) -> Result<u64> {
        self.client
            .download_file(location, local)
            .await
            .with_context(|| format!("Failed to download {}", location.path()))
    }
}
