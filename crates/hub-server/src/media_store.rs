//! On-disk storage for chat attachments.
//!
//! Files land flat in one directory under `<millis>-<rand>.<ext>`; the stored
//! reference is `uploads/<name>`, which is what the chat row keeps.

use std::path::{Component, Path, PathBuf};

use chrono::Utc;
use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

use hub_shared::constants::UPLOADS_URL_PREFIX;
use hub_shared::media::FileFormat;

use crate::error::ServerError;

/// Verify that a resolved path stays within the expected base directory.
fn ensure_within(base: &Path, target: &Path) -> Result<PathBuf, ServerError> {
    let canonical_base = base.canonicalize().unwrap_or_else(|_| base.to_path_buf());
    let mut resolved = canonical_base.clone();
    for component in target
        .strip_prefix(base)
        .unwrap_or(target)
        .components()
    {
        match component {
            Component::Normal(c) => resolved.push(c),
            Component::ParentDir => {
                return Err(ServerError::BadRequest("Path traversal detected".to_string()));
            }
            _ => {}
        }
    }
    if !resolved.starts_with(&canonical_base) {
        return Err(ServerError::BadRequest("Path traversal detected".to_string()));
    }
    Ok(resolved)
}

#[derive(Debug, Clone)]
pub struct MediaStore {
    base_path: PathBuf,
}

impl MediaStore {
    pub async fn new(base_path: PathBuf) -> Result<Self, ServerError> {
        fs::create_dir_all(&base_path).await.map_err(|e| {
            ServerError::MediaStorage(format!(
                "Failed to create uploads directory '{}': {}",
                base_path.display(),
                e
            ))
        })?;

        info!(path = %base_path.display(), "Media store initialized");

        Ok(Self { base_path })
    }

    /// Write an already validated attachment. Returns its stored reference.
    pub async fn store(&self, data: &[u8], format: FileFormat) -> Result<String, ServerError> {
        let name = format!(
            "{}-{}.{}",
            Utc::now().timestamp_millis(),
            &Uuid::new_v4().simple().to_string()[..8],
            format.extension()
        );
        let path = self.safe_path(&name)?;

        fs::write(&path, data).await.map_err(|e| {
            ServerError::MediaStorage(format!("Failed to write {}: {}", name, e))
        })?;

        debug!(file = %name, size = data.len(), "Stored attachment");
        Ok(format!("{UPLOADS_URL_PREFIX}{name}"))
    }

    pub async fn read(&self, name: &str) -> Result<Vec<u8>, ServerError> {
        let path = self.safe_path(name)?;
        match fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ServerError::NotFound(name.to_string()))
            }
            Err(e) => Err(ServerError::MediaStorage(format!(
                "Failed to read {}: {}",
                name, e
            ))),
        }
    }

    /// Unlink a stored attachment by its reference. Returns `false` if the
    /// file was already gone.
    pub async fn remove(&self, reference: &str) -> Result<bool, ServerError> {
        let name = reference
            .strip_prefix(UPLOADS_URL_PREFIX)
            .unwrap_or(reference);
        let path = self.safe_path(name)?;

        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(file = %name, "Removed attachment");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(ServerError::MediaStorage(format!(
                "Failed to delete {}: {}",
                name, e
            ))),
        }
    }

    #[cfg(test)]
    pub async fn list(&self) -> Result<Vec<String>, ServerError> {
        let mut names = Vec::new();
        let mut entries = fs::read_dir(&self.base_path)
            .await
            .map_err(|e| ServerError::MediaStorage(format!("Failed to list uploads: {}", e)))?;

        while let Some(entry) = entries.next_entry().await.map_err(|e| {
            ServerError::MediaStorage(format!("Failed to read directory entry: {}", e))
        })? {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }

        Ok(names)
    }

    fn safe_path(&self, name: &str) -> Result<PathBuf, ServerError> {
        if name.is_empty() || name.contains('/') || name.contains('\\') || name.contains("..") {
            return Err(ServerError::BadRequest("Path traversal detected".to_string()));
        }
        ensure_within(&self.base_path, &self.base_path.join(name))
    }
}
