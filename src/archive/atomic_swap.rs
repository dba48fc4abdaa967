//! Write-to-temporary-then-rename replacement of an archive file
//!
//! The temporary file lives in the same directory as the target so the final
//! rename never crosses a filesystem boundary.

use crate::error::{AppError, Result};
use std::fs::File;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// Pending replacement of `target`.
///
/// Dropping an uncommitted swap deletes the temporary file and leaves the
/// target untouched.
pub struct AtomicSwap {
    target: PathBuf,
    temp: NamedTempFile,
}

impl AtomicSwap {
    pub fn new(target: &Path) -> Result<Self> {
        let dir = match target.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let file_name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "archive".to_string());

        let temp = tempfile::Builder::new()
            .prefix(&format!(".{}.", file_name))
            .suffix(".tmp")
            .tempfile_in(&dir)?;

        debug!(target = %target.display(), temp = %temp.path().display(), "Opened temporary archive");

        Ok(Self {
            target: target.to_path_buf(),
            temp,
        })
    }

    pub fn temp_path(&self) -> &Path {
        self.temp.path()
    }

    /// Handle to the temporary file for the encoder
    pub fn file(&self) -> Result<File> {
        Ok(self.temp.reopen()?)
    }

    /// Moves the temporary file over the target, keeping the target's permissions
    pub fn commit(self) -> Result<()> {
        let target = self.target;
        if let Ok(metadata) = std::fs::metadata(&target) {
            self.temp.as_file().set_permissions(metadata.permissions())?;
        }
        self.temp.persist(&target).map_err(|e| {
            AppError::Io(std::io::Error::new(
                e.error.kind(),
                format!("Failed to replace {}: {}", target.display(), e.error),
            ))
        })?;
        debug!(target = %target.display(), "Archive replaced atomically");
        Ok(())
    }
}
