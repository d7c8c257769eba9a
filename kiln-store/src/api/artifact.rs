//! Artifact API Handlers
//!
//! Uploads and downloads below `/buildproducts/`. Request paths mirror the
//! on-disk layout, so the public URL of an artifact is its store path.

use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};

use crate::api::error::ApiResult;
use crate::service::artifact_service::{Artifact, ArtifactStore};

/// PUT /buildproducts/{*path}
/// Store an artifact; existing paths are never overwritten
pub async fn upload_artifact(
    State(store): State<ArtifactStore>,
    Path(path): Path<String>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    tracing::debug!("Uploading {} ({} bytes)", path, body.len());

    let size = store.store(&path, &body).await?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "path": path, "size": size })),
    ))
}

/// GET /buildproducts/{*path}
/// Download a file or list a directory
pub async fn get_artifact(
    State(store): State<ArtifactStore>,
    Path(path): Path<String>,
) -> ApiResult<Response> {
    tracing::debug!("Fetching {}", path);
    fetch(&store, &path).await
}

/// GET /buildproducts
/// List the top level of the store
pub async fn list_root(State(store): State<ArtifactStore>) -> ApiResult<Response> {
    fetch(&store, "").await
}

async fn fetch(store: &ArtifactStore, path: &str) -> ApiResult<Response> {
    let response = match store.fetch(path).await? {
        Artifact::File(data) => (
            [(header::CONTENT_TYPE, "application/octet-stream")],
            data,
        )
            .into_response(),
        Artifact::Directory(entries) => Json(entries).into_response(),
    };

    Ok(response)
}
