// SPDX-License-Identifier: MIT

//! Artifact persistence for exported reports

use crate::adk::error::CapabilityError;
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs;

/// Saves named artifacts and returns where they ended up
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn save(&self, artifact: &[u8], name: &str) -> Result<String, CapabilityError>;
}

/// Writes artifacts as files under a root directory
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl DocumentStore for FileStore {
    async fn save(&self, artifact: &[u8], name: &str) -> Result<String, CapabilityError> {
        if name.is_empty() || name.contains('/') || name.contains('\\') || name.starts_with('.') {
            return Err(CapabilityError::Store(format!("invalid artifact name: {:?}", name)));
        }

        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| CapabilityError::Store(e.to_string()))?;

        let path = self.root.join(name);
        fs::write(&path, artifact)
            .await
            .map_err(|e| CapabilityError::Store(e.to_string()))?;

        log::info!("Saved artifact to {}", path.display());
        Ok(path.display().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("outputs"));

        let location = store.save(b"# Report", "report.md").await.unwrap();

        let written = std::fs::read_to_string(&location).unwrap();
        assert_eq!(written, "# Report");
    }

    #[tokio::test]
    async fn test_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());

        assert!(store.save(b"x", "../escape.md").await.is_err());
        assert!(store.save(b"x", "").await.is_err());
    }
}
