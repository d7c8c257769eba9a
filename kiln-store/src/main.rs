use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod api;
pub mod service;

use service::artifact_service::ArtifactStore;

const DEFAULT_MAX_UPLOAD_MB: usize = 4096;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kiln_store=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Kiln artifact store...");

    let root = std::env::var("STORE_ROOT").unwrap_or_else(|_| "public_html".to_string());
    let max_upload_mb = std::env::var("STORE_MAX_UPLOAD_MB")
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(DEFAULT_MAX_UPLOAD_MB);

    let store = ArtifactStore::new(&root);
    store.init().await?;

    tracing::info!("Serving artifacts from {}", store.root().display());

    // Build router with all API endpoints
    let app = api::create_router(store, max_upload_mb * 1024 * 1024);

    // Get bind address
    let addr = std::env::var("STORE_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8010".to_string());

    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;

    axum::serve(listener, app).await
}
