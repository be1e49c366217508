use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

/// Local scratch storage used while a job is in flight.
#[async_trait]
pub trait ScratchFs: Send + Sync {
    async fn create_dir_all(&self, path: &Path) -> Result<(), ScratchError>;

    /// Create the directory if it does not exist yet.
    async fn ensure_dir(&self, path: &Path) -> Result<(), ScratchError>;

    async fn write(&self, path: &Path, data: &[u8]) -> Result<(), ScratchError>;

    async fn read(&self, path: &Path) -> Result<Vec<u8>, ScratchError>;

    /// Entry names in `path`, sorted.
    async fn read_dir(&self, path: &Path) -> Result<Vec<String>, ScratchError>;

    /// Remove a file or a directory tree. Missing paths are not an error.
    async fn remove(&self, path: &Path) -> Result<(), ScratchError>;
}

/// `tokio::fs` implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFs;

impl LocalFs {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ScratchFs for LocalFs {
    async fn create_dir_all(&self, path: &Path) -> Result<(), ScratchError> {
        tokio::fs::create_dir_all(path)
            .await
            .map_err(|e| ScratchError::io("create", path, e))
    }

    async fn ensure_dir(&self, path: &Path) -> Result<(), ScratchError> {
        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(ScratchError::NotADirectory(path.to_path_buf())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => self.create_dir_all(path).await,
            Err(e) => Err(ScratchError::io("inspect", path, e)),
        }
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<(), ScratchError> {
        tokio::fs::write(path, data)
            .await
            .map_err(|e| ScratchError::io("write", path, e))
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>, ScratchError> {
        tokio::fs::read(path)
            .await
            .map_err(|e| ScratchError::io("read", path, e))
    }

    async fn read_dir(&self, path: &Path) -> Result<Vec<String>, ScratchError> {
        let mut entries = tokio::fs::read_dir(path)
            .await
            .map_err(|e| ScratchError::io("list", path, e))?;

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ScratchError::io("list", path, e))?
        {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    async fn remove(&self, path: &Path) -> Result<(), ScratchError> {
        let meta = match tokio::fs::symlink_metadata(path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(ScratchError::io("inspect", path, e)),
        };

        let removed = if meta.is_dir() {
            tokio::fs::remove_dir_all(path).await
        } else {
            tokio::fs::remove_file(path).await
        };

        match removed {
            Err(e) if e.kind() != io::ErrorKind::NotFound => {
                Err(ScratchError::io("remove", path, e))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ScratchError {
    #[error("Failed to {op} {}: {source}", .path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{} exists and is not a directory", .0.display())]
    NotADirectory(PathBuf),
}

impl ScratchError {
    fn io(op: &'static str, path: &Path, source: io::Error) -> Self {
        Self::Io {
            op,
            path: path.to_path_buf(),
            source,
        }
    }
}
