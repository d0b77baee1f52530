// src/file_manager.rs - Input metadata and result output
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;

use crate::stabilization::StabilizationResults;

#[derive(Debug, Error)]
pub enum FileManagerError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("Serialization error: {0}")]
    Serialize(String),
}

#[derive(Debug, Clone)]
pub struct FileInfo {
    pub name: String,
    pub size: u64,
    pub is_directory: bool,
    pub modified: std::time::SystemTime,
}

#[derive(Debug, Clone)]
pub struct FileManager {
    current_directory: PathBuf,
}

impl Default for FileManager {
    fn default() -> Self {
        Self::new()
    }
}

impl FileManager {
    pub fn new() -> Self {
        Self {
            current_directory: PathBuf::from("."),
        }
    }

    /// Resolve relative paths against `dir` instead of the process working directory.
    pub fn with_directory(dir: impl Into<PathBuf>) -> Self {
        Self {
            current_directory: dir.into(),
        }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.current_directory.join(path)
        }
    }

    pub async fn file_info(&self, path: &str) -> Result<FileInfo, FileManagerError> {
        let full_path = self.resolve(path);
        let metadata = fs::metadata(&full_path)
            .await
            .map_err(|e| FileManagerError::Io(format!("{}: {}", full_path.display(), e)))?;
        let name = full_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string());
        Ok(FileInfo {
            name,
            size: metadata.len(),
            is_directory: metadata.is_dir(),
            modified: metadata.modified().unwrap_or(std::time::SystemTime::UNIX_EPOCH),
        })
    }

    /// Write the run results as pretty-printed JSON. Returns the path written.
    pub async fn write_results(&self, path: &str, results: &StabilizationResults) -> Result<PathBuf, FileManagerError> {
        let full_path = self.resolve(path);
        let json = serde_json::to_string_pretty(results).map_err(|e| FileManagerError::Serialize(e.to_string()))?;
        tracing::info!("Writing {} snapshot plan(s) to {}", results.snapshot_plans.len(), full_path.display());
        fs::write(&full_path, json)
            .await
            .map_err(|e| FileManagerError::Io(format!("{}: {}", full_path.display(), e)))?;
        Ok(full_path)
    }
}
