use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("output directory missing or not writable: {0}")]
    OutputDir(String),
    #[error("invalid relative path {0:?}")]
    InvalidPath(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Ensure output directory exists; create if missing.
pub fn ensure_output_dir(dir: &Path) -> Result<(), PersistError> {
    if dir.exists() {
        let meta = fs::metadata(dir).map_err(|e| PersistError::OutputDir(e.to_string()))?;
        if !meta.is_dir() {
            return Err(PersistError::OutputDir("path is not a directory".into()));
        }
    } else {
        fs::create_dir_all(dir).map_err(|e| PersistError::OutputDir(e.to_string()))?;
    }
    // Basic writability probe: try creating a temp file.
    NamedTempFile::new_in(dir).map_err(|e| PersistError::OutputDir(e.to_string()))?;
    Ok(())
}

/// Atomically write files below a root directory by writing a temp file then renaming.
#[derive(Debug, Clone)]
pub struct AtomicFileWriter {
    root: PathBuf,
}

impl AtomicFileWriter {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Write `content` to `{root}/{relative}`, creating parent directories.
    ///
    /// `relative` uses `/` separators and may not leave the root.
    pub fn write(&self, relative: &str, content: &[u8]) -> Result<PathBuf, PersistError> {
        let target = self.target_path(relative)?;
        let parent = target
            .parent()
            .ok_or_else(|| PersistError::InvalidPath(relative.to_string()))?;
        fs::create_dir_all(parent).map_err(|e| PersistError::OutputDir(e.to_string()))?;

        let mut tmp = NamedTempFile::new_in(parent)?;
        tmp.write_all(content)?;
        tmp.flush()?;
        tmp.as_file_mut().sync_all()?;

        // Replace existing file if present to keep determinism.
        if target.exists() {
            fs::remove_file(&target)?;
        }
        tmp.persist(&target).map_err(|e| PersistError::Io(e.error))?;
        Ok(target)
    }

    fn target_path(&self, relative: &str) -> Result<PathBuf, PersistError> {
        let mut target = self.root.clone();
        let mut depth = 0;
        for component in relative.split('/') {
            if component.is_empty() || component == "." || component == ".." {
                return Err(PersistError::InvalidPath(relative.to_string()));
            }
            target.push(component);
            depth += 1;
        }
        if depth == 0 {
            return Err(PersistError::InvalidPath(relative.to_string()));
        }
        Ok(target)
    }
}
