use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::debug;
use walkdir::WalkDir;

use super::{validate_filename, StorageBackend};
use crate::error::{MediaError, Result};

/// Assets as plain files in one flat directory.
///
/// The directory is created lazily on first use. Creation errors are ignored
/// here; the write that follows reports the real problem.
#[derive(Debug)]
pub struct NativeFilesystemBackend {
    dir: PathBuf,
    dir_ready: OnceCell<()>,
}

impl NativeFilesystemBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            dir_ready: OnceCell::new(),
        }
    }

    /// Directory holding the assets
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn ensure_dir(&self) {
        self.dir_ready
            .get_or_init(|| async {
                if let Err(e) = tokio::fs::create_dir_all(&self.dir).await {
                    debug!("create_dir_all({}) failed: {}", self.dir.display(), e);
                }
            })
            .await;
    }

    /// Map a filename to its path, refusing anything that escapes the flat namespace
    fn path_for(&self, filename: &str) -> Result<PathBuf> {
        validate_filename(filename)?;
        Ok(self.dir.join(filename))
    }
}

#[async_trait]
impl StorageBackend for NativeFilesystemBackend {
    async fn write(&self, filename: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(filename)?;
        self.ensure_dir().await;
        tokio::fs::write(&path, bytes).await?;
        debug!("Wrote {} ({} bytes)", path.display(), bytes.len());
        Ok(())
    }

    async fn read(&self, filename: &str) -> Result<Vec<u8>> {
        let path = self.path_for(filename)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(MediaError::NotFound(filename.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, filename: &str) -> Result<()> {
        let path = self.path_for(filename)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Vec<String>> {
        let dir = self.dir.clone();
        let names = tokio::task::spawn_blocking(move || {
            if !dir.is_dir() {
                return Vec::new();
            }
            let mut names: Vec<String> = WalkDir::new(&dir)
                .min_depth(1)
                .max_depth(1)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .map(|e| e.file_name().to_string_lossy().to_string())
                .collect();
            names.sort();
            names
        })
        .await?;
        Ok(names)
    }

    async fn exists(&self, filename: &str) -> Result<bool> {
        let path = self.path_for(filename)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    async fn url(&self, filename: &str) -> Result<String> {
        let path = tokio::fs::canonicalize(self.path_for(filename)?).await?;
        url::Url::from_file_path(&path)
            .map(String::from)
            .map_err(|_| MediaError::InvalidFilename(filename.to_string()))
    }
}
