//! Maps an archive path to the handler for its format
//!
//! Selection is purely by file name suffix, case-insensitively. `.tar.gz` is
//! checked as a whole suffix before the single extension is looked at.

use crate::archive::archive_handler::{ArchiveHandler, EntryVisitor};
use crate::archive::progress_reporter::ProgressSink;
use crate::archive::tar_handler::TarHandler;
use crate::archive::zip_handler::ZipHandler;
use crate::error::{AppError, Result};
use crate::infrastructure::config::CompressionConfig;
use crate::models::ArchiveEntry;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

const SUPPORTED_EXTENSIONS: &[&str] = &[".zip", ".tar", ".tar.gz"];

/// Container formats the crate can read and write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArchiveFormat {
    Zip,
    Tar,
    TarGz,
}

impl ArchiveFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        if file_name.ends_with(".tar.gz") {
            return Ok(ArchiveFormat::TarGz);
        }

        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        match extension.as_str() {
            "zip" => Ok(ArchiveFormat::Zip),
            "tar" => Ok(ArchiveFormat::Tar),
            "" => Err(AppError::unsupported_format("")),
            other => Err(AppError::unsupported_format(format!(".{}", other))),
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ArchiveFormat::Zip => ".zip",
            ArchiveFormat::Tar => ".tar",
            ArchiveFormat::TarGz => ".tar.gz",
        }
    }

    /// Name stored in the metadata repository's `archive_type` column
    pub fn display_name(&self) -> &'static str {
        match self {
            ArchiveFormat::Zip => "ZIP",
            ArchiveFormat::Tar => "TAR",
            ArchiveFormat::TarGz => "TAR.GZ",
        }
    }

    pub fn handler(&self, compression: &CompressionConfig) -> ArchiveAdapter {
        match self {
            ArchiveFormat::Zip => {
                ArchiveAdapter::Zip(ZipHandler::with_compression_level(compression.zip_level))
            }
            ArchiveFormat::Tar => ArchiveAdapter::Tar(TarHandler::plain()),
            ArchiveFormat::TarGz => {
                ArchiveAdapter::Tar(TarHandler::gzip().with_gzip_level(compression.gzip_level))
            }
        }
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/**
 * Handler chosen for one archive path
 *
 * A closed set of formats, so dispatch is a match rather than a trait object;
 * this keeps the generic `accept_visitor` callable.
 */
#[derive(Debug, Clone)]
pub enum ArchiveAdapter {
    Zip(ZipHandler),
    Tar(TarHandler),
}

impl ArchiveAdapter {
    pub fn format(&self) -> ArchiveFormat {
        match self {
            ArchiveAdapter::Zip(_) => ArchiveFormat::Zip,
            ArchiveAdapter::Tar(handler) if handler.is_gzip() => ArchiveFormat::TarGz,
            ArchiveAdapter::Tar(_) => ArchiveFormat::Tar,
        }
    }
}

#[async_trait]
impl ArchiveHandler for ArchiveAdapter {
    async fn create(
        &self,
        archive: &Path,
        inputs: &[PathBuf],
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<()> {
        match self {
            ArchiveAdapter::Zip(h) => h.create(archive, inputs, progress, cancel).await,
            ArchiveAdapter::Tar(h) => h.create(archive, inputs, progress, cancel).await,
        }
    }

    async fn add_files(
        &self,
        archive: &Path,
        inputs: &[PathBuf],
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<()> {
        match self {
            ArchiveAdapter::Zip(h) => h.add_files(archive, inputs, progress, cancel).await,
            ArchiveAdapter::Tar(h) => h.add_files(archive, inputs, progress, cancel).await,
        }
    }

    async fn delete_files(
        &self,
        archive: &Path,
        names: &[String],
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<()> {
        match self {
            ArchiveAdapter::Zip(h) => h.delete_files(archive, names, progress, cancel).await,
            ArchiveAdapter::Tar(h) => h.delete_files(archive, names, progress, cancel).await,
        }
    }

    async fn extract_all(
        &self,
        archive: &Path,
        destination: &Path,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<()> {
        match self {
            ArchiveAdapter::Zip(h) => h.extract_all(archive, destination, progress, cancel).await,
            ArchiveAdapter::Tar(h) => h.extract_all(archive, destination, progress, cancel).await,
        }
    }

    async fn get_entries(
        &self,
        archive: &Path,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<Vec<ArchiveEntry>> {
        match self {
            ArchiveAdapter::Zip(h) => h.get_entries(archive, progress, cancel).await,
            ArchiveAdapter::Tar(h) => h.get_entries(archive, progress, cancel).await,
        }
    }

    async fn accept_visitor<V>(
        &self,
        archive: &Path,
        visitor: V,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<V>
    where
        V: EntryVisitor + 'static,
    {
        match self {
            ArchiveAdapter::Zip(h) => h.accept_visitor(archive, visitor, progress, cancel).await,
            ArchiveAdapter::Tar(h) => h.accept_visitor(archive, visitor, progress, cancel).await,
        }
    }
}

/// Returns the handler for `path` with default compression settings
pub fn create_for(path: &Path) -> Result<ArchiveAdapter> {
    create_for_with(path, &CompressionConfig::default())
}

pub fn create_for_with(path: &Path, compression: &CompressionConfig) -> Result<ArchiveAdapter> {
    Ok(ArchiveFormat::from_path(path)?.handler(compression))
}

pub fn is_supported(path: &Path) -> bool {
    ArchiveFormat::from_path(path).is_ok()
}

pub fn supported_extensions() -> &'static [&'static str] {
    SUPPORTED_EXTENSIONS
}
