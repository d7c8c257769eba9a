//! Artifact Service
//!
//! Write-once file storage below `<root>/buildproducts/`.
//!
//! Uploads land in a staging file first and are hard-linked into place, so a
//! reader never observes a partial artifact and an existing artifact is never
//! replaced.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use kiln_core::router::STORE_ROOT;
use uuid::Uuid;

const STAGING_DIR: &str = ".staging";

/// Service error type
#[derive(Debug)]
pub enum ArtifactError {
    NotFound(String),
    InvalidPath(String),
    AlreadyExists(String),
    Io(std::io::Error),
}

impl From<std::io::Error> for ArtifactError {
    fn from(err: std::io::Error) -> Self {
        ArtifactError::Io(err)
    }
}

pub type Result<T> = std::result::Result<T, ArtifactError>;

/// A stored path: either a file's bytes or a directory's entries
#[derive(Debug)]
pub enum Artifact {
    File(Vec<u8>),
    /// Entry names; subdirectories end with `/`
    Directory(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Creates the store and staging directories
    pub async fn init(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(self.products_dir()).await?;
        tokio::fs::create_dir_all(self.staging_dir()).await?;
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn products_dir(&self) -> PathBuf {
        self.root.join(STORE_ROOT)
    }

    fn staging_dir(&self) -> PathBuf {
        self.root.join(STAGING_DIR)
    }

    /// Stores `data` at `relative`, failing if the path already exists
    pub async fn store(&self, relative: &str, data: &[u8]) -> Result<u64> {
        if relative.ends_with('/') {
            return Err(ArtifactError::InvalidPath(relative.to_string()));
        }
        let target = self.resolve(relative)?;

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let staged = self.staging_dir().join(Uuid::new_v4().to_string());
        tokio::fs::write(&staged, data).await?;

        let linked = tokio::fs::hard_link(&staged, &target).await;
        if let Err(err) = tokio::fs::remove_file(&staged).await {
            tracing::warn!("Failed to remove staged upload {}: {}", staged.display(), err);
        }

        match linked {
            Ok(()) => {
                tracing::info!("Stored {} ({} bytes)", relative, data.len());
                Ok(data.len() as u64)
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                Err(ArtifactError::AlreadyExists(relative.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Reads a stored file, or lists a stored directory
    pub async fn fetch(&self, relative: &str) -> Result<Artifact> {
        let path = if relative.trim_matches('/').is_empty() {
            self.products_dir()
        } else {
            self.resolve(relative.trim_end_matches('/'))?
        };

        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(ArtifactError::NotFound(relative.to_string()));
            }
            Err(err) => return Err(err.into()),
        };

        if metadata.is_dir() {
            return Ok(Artifact::Directory(list_dir(&path).await?));
        }

        Ok(Artifact::File(tokio::fs::read(&path).await?))
    }

    /// Maps a `/`-separated relative path into the store
    ///
    /// Rejects empty, `.` and `..` components, backslashes, and absolute
    /// paths, so every accepted path stays below the store directory.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let invalid = || ArtifactError::InvalidPath(relative.to_string());

        if relative.is_empty() || relative.contains('\\') {
            return Err(invalid());
        }

        let mut path = self.products_dir();
        for component in relative.split('/') {
            if component.is_empty() || component == "." || component == ".." {
                return Err(invalid());
            }
            path.push(component);
        }

        Ok(path)
    }
}

async fn list_dir(path: &Path) -> Result<Vec<String>> {
    let mut entries = Vec::new();
    let mut dir = tokio::fs::read_dir(path).await?;

    while let Some(entry) = dir.next_entry().await? {
        let mut name = entry.file_name().to_string_lossy().into_owned();
        if entry.file_type().await?.is_dir() {
            name.push('/');
        }
        entries.push(name);
    }

    entries.sort();
    Ok(entries)
}
