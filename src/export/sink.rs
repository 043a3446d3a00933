//! Persistence sinks
//!
//! Where finished exports go. The sink only has to be done reading the file
//! before the cleanup grace delay runs out.

use crate::export::types::MediaKind;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

#[async_trait]
pub trait PersistenceSink: Send + Sync {
    /// Persist the file at `path`
    async fn save(&self, path: &Path, kind: MediaKind) -> Result<()>;
}

/// Copies finished exports into a library directory
#[derive(Debug, Clone)]
pub struct DirectorySink {
    library_dir: PathBuf,
}

impl DirectorySink {
    pub fn new(library_dir: impl Into<PathBuf>) -> Self {
        Self {
            library_dir: library_dir.into(),
        }
    }

    pub fn library_dir(&self) -> &Path {
        &self.library_dir
    }
}

#[async_trait]
impl PersistenceSink for DirectorySink {
    async fn save(&self, path: &Path, kind: MediaKind) -> Result<()> {
        tokio::fs::create_dir_all(&self.library_dir)
            .await
            .with_context(|| format!("creating library directory {:?}", self.library_dir))?;

        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("mp4");
        let prefix = match kind {
            MediaKind::Video => "video",
        };
        let name = format!(
            "{}_{}_{}.{}",
            prefix,
            chrono::Local::now().format("%Y%m%d_%H%M%S"),
            &uuid::Uuid::new_v4().simple().to_string()[..8],
            extension
        );
        let target = self.library_dir.join(name);

        tokio::fs::copy(path, &target)
            .await
            .with_context(|| format!("copying {:?} to {:?}", path, target))?;
        tracing::info!("Saved {:?} to library as {:?}", path, target);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_copies_into_library() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("composed.mov");
        std::fs::write(&source, b"movie").unwrap();
        let sink = DirectorySink::new(dir.path().join("library"));

        sink.save(&source, MediaKind::Video).await.unwrap();

        let saved: Vec<_> = std::fs::read_dir(sink.library_dir())
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].extension().unwrap(), "mov");
        assert_eq!(std::fs::read(&saved[0]).unwrap(), b"movie");
        assert!(source.exists());
    }

    #[tokio::test]
    async fn test_missing_source_fails() {
        let dir = TempDir::new().unwrap();
        let sink = DirectorySink::new(dir.path().join("library"));
        assert!(sink.save(&dir.path().join("gone.mp4"), MediaKind::Video).await.is_err());
    }
}
