//! Artifact store command handlers

use anyhow::{Context, Result};
use colored::*;
use kiln_client::StoreClient;

use crate::config::Config;

/// Check the artifact store's health endpoint
pub async fn health(config: &Config) -> Result<()> {
    let client = StoreClient::new(config.store_url.clone());
    let status = client
        .health()
        .await
        .with_context(|| format!("Artifact store at {} is unreachable", config.store_url))?;

    println!(
        "{} {} ({} {})",
        "✓".green().bold(),
        client.base_url().bold(),
        status.status.green(),
        format!("v{}", status.version).dimmed()
    );
    Ok(())
}
