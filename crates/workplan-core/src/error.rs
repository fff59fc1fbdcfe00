use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to serialize JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Failed to serialize document header: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Timed out waiting for write lock {0}")]
    LockTimeout(PathBuf),
    #[error("Task already exists: {0}")]
    TaskExists(String),
    #[error("Progress date may not contain ':': {0}")]
    InvalidProgressDate(String),
}

impl StoreError {
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Attaches the offending path to a bare `std::io::Error`.
pub(crate) trait IoContext<T> {
    fn at(self, path: &Path) -> Result<T>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn at(self, path: &Path) -> Result<T> {
        self.map_err(|err| StoreError::io(path, err))
    }
}
