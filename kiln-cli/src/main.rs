//! Kiln CLI
//!
//! Command-line interface for inspecting Kiln pipelines and the artifact store.

mod commands;
mod config;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use config::Config;

#[derive(Parser)]
#[command(name = "kiln")]
#[command(about = "Kiln package build CLI", long_about = None)]
struct Cli {
    /// Artifact store URL
    #[arg(long, env = "KILN_STORE_URL", default_value = "http://localhost:8010")]
    store_url: String,

    /// Base URL of the remote helper scripts
    #[arg(
        long,
        env = "KILN_SCRIPT_BASE_URL",
        default_value = "http://localhost:8010/scripts/"
    )]
    script_base_url: String,

    /// Source repository built by the tarball pipeline
    #[arg(
        long,
        env = "KILN_REPO_URL",
        default_value = "https://git.whamcloud.com/fs/lustre-release.git"
    )]
    repo_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config {
        store_url: cli.store_url,
        script_base_url: cli.script_base_url,
        repo_url: cli.repo_url,
    };

    handle_command(cli.command, &config).await
}
