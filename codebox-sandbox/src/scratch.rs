//! Scratch directory and its file registry
//!
//! The directory is flat: listings and clears only look at regular files
//! directly inside it. Nothing is cached; every call reads the filesystem.

use crate::error::{Result, SandboxError};
use crate::types::FileInfo;
use std::fs;
use std::path::{Path, PathBuf};

/// Process-wide area where executed code and the artifact extractor write files
#[derive(Debug, Clone)]
pub struct ScratchDir {
    root: PathBuf,
}

impl ScratchDir {
    /// Create the directory if needed and resolve it to an absolute path
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        fs::create_dir_all(path).map_err(|e| SandboxError::scratch(path, e))?;
        let root = fs::canonicalize(path).map_err(|e| SandboxError::scratch(path, e))?;

        tracing::info!(path = %root.display(), "Scratch directory ready");
        Ok(Self { root })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Resolve a script-supplied path; relative paths land inside the directory
    pub fn resolve(&self, path: &str) -> PathBuf {
        let candidate = Path::new(path);
        if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.root.join(candidate)
        }
    }

    /// Regular files directly inside the directory, sorted by name.
    ///
    /// Enumeration errors are logged and produce an empty listing.
    pub fn list_files(&self) -> Vec<FileInfo> {
        match self.try_list_files() {
            Ok(files) => files,
            Err(e) => {
                tracing::warn!(error = %e, "Error listing scratch files");
                Vec::new()
            }
        }
    }

    fn try_list_files(&self) -> Result<Vec<FileInfo>> {
        let entries = fs::read_dir(&self.root).map_err(|e| SandboxError::scratch(&self.root, e))?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| SandboxError::scratch(&self.root, e))?;
            let path = entry.path();
            let metadata = match fs::metadata(&path) {
                Ok(metadata) => metadata,
                // Removed between read_dir and stat
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(SandboxError::scratch(&path, e)),
            };
            if !metadata.is_file() {
                continue;
            }

            files.push(FileInfo {
                name: entry.file_name().to_string_lossy().into_owned(),
                file_type: file_type(&path),
                size: metadata.len(),
                path: path.to_string_lossy().into_owned(),
            });
        }

        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    /// Delete every regular file directly inside the directory.
    ///
    /// Stops at the first failure; files deleted before it stay deleted.
    pub fn clear_files(&self) -> Result<usize> {
        let entries = fs::read_dir(&self.root).map_err(|source| SandboxError::ClearFiles {
            deleted: 0,
            source,
        })?;

        let mut deleted = 0;
        for entry in entries {
            let entry = entry.map_err(|source| SandboxError::ClearFiles { deleted, source })?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            fs::remove_file(&path).map_err(|source| SandboxError::ClearFiles { deleted, source })?;
            deleted += 1;
        }

        tracing::info!(deleted, path = %self.root.display(), "Scratch files cleared");
        Ok(deleted)
    }
}

/// Lowercase suffix with its leading dot, or `unknown`
fn file_type(path: &Path) -> String {
    path.extension()
        .filter(|ext| !ext.is_empty())
        .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
        .unwrap_or_else(|| "unknown".to_string())
}
