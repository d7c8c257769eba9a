//! Artifact transfer endpoints

use std::path::{Component, Path};

use kiln_core::router::ArtifactLocation;
use tokio::io::AsyncWriteExt;
use walkdir::WalkDir;

use crate::StoreClient;
use crate::error::{ClientError, Result};

impl StoreClient {
    // =============================================================================
    // Uploads
    // =============================================================================

    /// Upload one local file to a store location
    ///
    /// The store is write-once: uploading to an existing path fails with a
    /// conflict (see [`ClientError::is_conflict`]).
    pub async fn upload_file(&self, local: &Path, location: &ArtifactLocation) -> Result<()> {
        self.put(local, &location.path()).await
    }

    /// Upload every file below `local_dir`, preserving relative structure
    ///
    /// Returns the number of files uploaded.
    pub async fn upload_directory(
        &self,
        local_dir: &Path,
        location: &ArtifactLocation,
    ) -> Result<usize> {
        let files = relative_files(local_dir)?;
        let base = location.path();
        let base = base.trim_end_matches('/');

        for relative in &files {
            let remote = format!("{}/{}", base, relative);
            self.put(&local_dir.join(relative), &remote).await?;
        }

        tracing::debug!(count = files.len(), destination = %base, "directory uploaded");
        Ok(files.len())
    }

    async fn put(&self, local: &Path, store_path: &str) -> Result<()> {
        let body = tokio::fs::read(local).await?;
        let url = self.artifact_url(store_path);
        tracing::debug!(file = %local.display(), %url, bytes = body.len(), "uploading");

        let response = self.client.put(&url).body(body).send().await?;
        self.check_status(response).await?;
        Ok(())
    }

    // =============================================================================
    // Downloads
    // =============================================================================

    /// Download a stored file into `local`, replacing it if present
    pub async fn download_file(&self, location: &ArtifactLocation, local: &Path) -> Result<u64> {
        let url = self.artifact_url(&location.path());
        tracing::debug!(%url, file = %local.display(), "downloading");

        let response = self.client.get(&url).send().await?;
        let mut response = self.check_status(response).await?;

        let mut file = tokio::fs::File::create(local).await?;
        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        Ok(written)
    }

    fn artifact_url(&self, store_path: &str) -> String {
        format!("{}/{}", self.base_url, store_path.trim_start_matches('/'))
    }
}

/// Files below `root` as `/`-separated relative paths, in a stable order
fn relative_files(root: &Path) -> Result<Vec<String>> {
    let mut files = Vec::new();

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| ClientError::Io(e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|_| ClientError::InvalidPath(entry.path().display().to_string()))?;
        files.push(to_store_path(relative)?);
    }

    Ok(files)
}

fn to_store_path(relative: &Path) -> Result<String> {
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(
                part.to_str()
                    .ok_or_else(|| ClientError::InvalidPath(relative.display().to_string()))?
                    .to_string(),
            ),
            _ => return Err(ClientError::InvalidPath(relative.display().to_string())),
        }
    }
    Ok(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn location(suffix: &str) -> ArtifactLocation {
        ArtifactLocation {
            suffix: suffix.to_string(),
            public_base: "http://build.example.org".to_string(),
        }
    }

    #[test]
    fn test_artifact_url_joins_store_path() {
        let client = StoreClient::new("http://localhost:8010/");
        assert_eq!(
            client.artifact_url(&location("123/4/lustre.tar.gz").path()),
            "http://localhost:8010/buildproducts/123/4/lustre.tar.gz"
        );
    }

    #[test]
    fn test_relative_files_preserve_structure() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("SRPM")).unwrap();
        fs::create_dir_all(dir.path().join("x86_64/kmod")).unwrap();
        fs::write(dir.path().join("SRPM/lustre.src.rpm"), b"src").unwrap();
        fs::write(dir.path().join("x86_64/kmod/lustre.rpm"), b"bin").unwrap();
        fs::write(dir.path().join("kiln.repo"), b"[kiln]").unwrap();

        let files = relative_files(dir.path()).unwrap();
        assert_eq!(
            files,
            vec!["SRPM/lustre.src.rpm", "kiln.repo", "x86_64/kmod/lustre.rpm"]
        );
    }

    #[test]
    fn test_to_store_path_rejects_parent_components() {
        assert!(to_store_path(Path::new("../escape")).is_err());
        assert_eq!(to_store_path(Path::new("a/b.rpm")).unwrap(), "a/b.rpm");
    }

    #[tokio::test]
    async fn test_upload_missing_directory_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let client = StoreClient::new("http://127.0.0.1:9");

        let err = client
            .upload_directory(&dir.path().join("deliverables"), &location("123/4/el7/7/"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Io(_)));
    }

    #[tokio::test]
    async fn test_upload_missing_file_fails_before_request() {
        let dir = tempfile::tempdir().unwrap();
        let client = StoreClient::new("http://127.0.0.1:9");

        let err = client
            .upload_file(&dir.path().join("missing.tar.gz"), &location("123/4/missing.tar.gz"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Io(_)));
    }
}
