//! Directory operations

use std::path::{Path, PathBuf};

use tokio::fs;

use crate::errors::OpsError;

/// A directory wrapper with path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dir {
    path: PathBuf,
}

impl Dir {
    /// Create a new directory reference
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the directory path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the directory exists
    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    /// Create the directory (and parents)
    pub async fn create(&self) -> Result<(), OpsError> {
        fs::create_dir_all(&self.path).await?;
        Ok(())
    }

    /// Delete the directory and all contents
    pub async fn delete(&self) -> Result<(), OpsError> {
        if self.exists().await {
            fs::remove_dir_all(&self.path).await?;
        }
        Ok(())
    }

    /// List the immediate entries of the directory, sorted by name
    pub async fn entries(&self) -> Result<Vec<PathBuf>, OpsError> {
        let mut paths = Vec::new();
        let mut entries = fs::read_dir(&self.path).await?;

        while let Some(entry) = entries.next_entry().await? {
            paths.push(entry.path());
        }

        paths.sort();
        Ok(paths)
    }

    /// If the directory holds exactly one entry and that entry is a
    /// directory, return it.
    pub async fn single_child_dir(&self) -> Result<Option<Dir>, OpsError> {
        let entries = self.entries().await?;
        if let [only] = entries.as_slice() {
            if fs::metadata(only).await?.is_dir() {
                return Ok(Some(Dir::new(only.clone())));
            }
        }
        Ok(None)
    }

    /// List every file below this directory as paths relative to it
    pub async fn files_recursive(&self) -> Result<Vec<PathBuf>, OpsError> {
        let mut files = Vec::new();
        let mut pending = vec![PathBuf::new()];

        while let Some(rel) = pending.pop() {
            let mut entries = fs::read_dir(self.path.join(&rel)).await?;
            while let Some(entry) = entries.next_entry().await? {
                let child = rel.join(entry.file_name());
                if entry.file_type().await?.is_dir() {
                    pending.push(child);
                } else {
                    files.push(child);
                }
            }
        }

        files.sort();
        Ok(files)
    }

    /// Copy every file below this directory onto `dest`, preserving relative
    /// paths and overwriting existing files. Files already in `dest` that are
    /// absent here are left alone. Returns the number of files copied.
    pub async fn copy_into(&self, dest: &Dir) -> Result<u64, OpsError> {
        let source = self.path.clone();
        let dest = dest.path.clone();
        tokio::task::spawn_blocking(move || copy_tree(&source, &dest)).await?
    }

    /// Get a file within this directory
    pub fn file(&self, name: &str) -> crate::filesys::file::File {
        crate::filesys::file::File::new(self.path.join(name))
    }

    /// Get a subdirectory
    pub fn subdir(&self, name: &str) -> Dir {
        Dir::new(self.path.join(name))
    }

    /// Create a uniquely named directory under the system temp dir
    pub async fn create_temp_dir(prefix: &str) -> Result<Dir, OpsError> {
        let temp_dir = std::env::temp_dir().join(format!("{}-{}", prefix, uuid::Uuid::new_v4()));
        fs::create_dir_all(&temp_dir).await?;
        Ok(Dir::new(temp_dir))
    }
}

fn copy_tree(source: &Path, dest: &Path) -> Result<u64, OpsError> {
    let mut copied = 0;
    let mut pending = vec![PathBuf::new()];

    while let Some(rel) = pending.pop() {
        std::fs::create_dir_all(dest.join(&rel))?;

        for entry in std::fs::read_dir(source.join(&rel))? {
            let entry = entry?;
            let child = rel.join(entry.file_name());
            if entry.file_type()?.is_dir() {
                pending.push(child);
            } else {
                std::fs::copy(entry.path(), dest.join(&child))?;
                copied += 1;
            }
        }
    }

    Ok(copied)
}
