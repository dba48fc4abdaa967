use crate::archive::progress_reporter::ProgressSink;
use crate::error::{AppError, Result};
use crate::models::ArchiveEntry;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashSet;
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use walkdir::WalkDir;

/**
 * Uniform operation set every container format implements
 *
 * All operations open, process and close the archive file within the call;
 * nothing is cached between calls. Entries are handled strictly in order and
 * `cancel` is checked before each entry.
 */
#[async_trait]
pub trait ArchiveHandler: Send + Sync {
    /// Writes a new archive at `archive` from files and directories in `inputs`
    async fn create(
        &self,
        archive: &Path,
        inputs: &[PathBuf],
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Adds inputs to an existing archive, replacing entries with the same name
    async fn add_files(
        &self,
        archive: &Path,
        inputs: &[PathBuf],
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Removes entries whose full name is in `names`; unknown names are ignored
    async fn delete_files(
        &self,
        archive: &Path,
        names: &[String],
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Recreates every entry below `destination`, overwriting existing files
    async fn extract_all(
        &self,
        archive: &Path,
        destination: &Path,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Lists entries in the container's native order
    async fn get_entries(
        &self,
        archive: &Path,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<Vec<ArchiveEntry>>;

    /// Walks every entry, handing the visitor one open content stream at a time.
    /// The visitor is returned so the caller can read its result.
    async fn accept_visitor<V>(
        &self,
        archive: &Path,
        visitor: V,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<V>
    where
        V: EntryVisitor + 'static;
}

/// Per-entry traversal callback
///
/// `content` is `None` for directory entries. The stream is only valid for the
/// duration of the call.
pub trait EntryVisitor: Send {
    fn visit(&mut self, entry: &ArchiveEntry, content: Option<&mut dyn Read>) -> Result<()>;
}

impl<F> EntryVisitor for F
where
    F: FnMut(&ArchiveEntry, Option<&mut dyn Read>) -> Result<()> + Send,
{
    fn visit(&mut self, entry: &ArchiveEntry, content: Option<&mut dyn Read>) -> Result<()> {
        self(entry, content)
    }
}

pub(crate) fn check_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(AppError::Cancelled);
    }
    Ok(())
}

/// An input expanded into archive items
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum InputItem {
    File { source: PathBuf, name: String },
    Directory { source: PathBuf, name: String },
}

impl InputItem {
    pub fn name(&self) -> &str {
        match self {
            InputItem::File { name, .. } | InputItem::Directory { name, .. } => name,
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self, InputItem::File { .. })
    }
}

/**
 * Expands one caller-supplied input path
 *
 * A regular file becomes a single item named by its base name. A directory
 * becomes a `base/` directory item followed by every descendant, named relative
 * to the directory's base name with `/` separators. Anything else is skipped.
 */
pub(crate) fn expand_input(input: &Path) -> Result<Vec<InputItem>> {
    let base = match input.file_name() {
        Some(name) => name.to_string_lossy().into_owned(),
        None => {
            warn!(input = %input.display(), "Input has no file name, skipping");
            return Ok(Vec::new());
        }
    };

    if input.is_file() {
        return Ok(vec![InputItem::File {
            source: input.to_path_buf(),
            name: base,
        }]);
    }

    if !input.is_dir() {
        warn!(input = %input.display(), "Input is neither a file nor a directory, skipping");
        return Ok(Vec::new());
    }

    let mut items = vec![InputItem::Directory {
        source: input.to_path_buf(),
        name: format!("{}/", base),
    }];

    for entry in WalkDir::new(input).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            AppError::Io(
                e.into_io_error()
                    .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "directory walk failed")),
            )
        })?;
        let relative = entry
            .path()
            .strip_prefix(input)
            .map_err(|e| AppError::invalid_argument(e.to_string()))?;
        let relative = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");

        if entry.file_type().is_dir() {
            items.push(InputItem::Directory {
                source: entry.path().to_path_buf(),
                name: format!("{}/{}/", base, relative),
            });
        } else if entry.file_type().is_file() {
            items.push(InputItem::File {
                source: entry.path().to_path_buf(),
                name: format!("{}/{}", base, relative),
            });
        }
    }

    Ok(items)
}

/// Expands every input, keeping only the last item for a repeated name
pub(crate) fn expand_inputs(inputs: &[PathBuf]) -> Result<Vec<Vec<InputItem>>> {
    let mut expanded = Vec::with_capacity(inputs.len());
    for input in inputs {
        expanded.push(expand_input(input)?);
    }

    let mut seen = HashSet::new();
    for group in expanded.iter_mut().rev() {
        let mut kept: Vec<InputItem> = group
            .drain(..)
            .rev()
            .filter(|item| seen.insert(item.name().to_string()))
            .collect();
        kept.reverse();
        *group = kept;
    }
    Ok(expanded)
}

/// Joins an entry name onto the extraction root, refusing names that escape it
pub(crate) fn resolve_entry_path(destination: &Path, name: &str) -> Result<PathBuf> {
    let relative = Path::new(name);
    let mut out = destination.to_path_buf();
    for component in relative.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(AppError::corrupt(
                    format!("Entry '{}' would be extracted outside the destination", name),
                    None,
                ));
            }
        }
    }
    Ok(out)
}

/// Streams one entry's content into a file, creating parent directories
pub(crate) fn write_entry_content(reader: &mut dyn Read, target: &Path) -> Result<u64> {
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut out = std::fs::File::create(target)?;
    let written = copy_entry(reader, &mut out)?;
    out.flush()?;
    Ok(written)
}

/// `io::copy` that reports decoder failures as archive corruption
pub(crate) fn copy_entry<W: Write + ?Sized>(reader: &mut dyn Read, writer: &mut W) -> Result<u64> {
    io::copy(reader, writer).map_err(map_read_error)
}

pub(crate) fn map_read_error(e: io::Error) -> AppError {
    match e.kind() {
        io::ErrorKind::InvalidData | io::ErrorKind::InvalidInput | io::ErrorKind::UnexpectedEof => {
            AppError::corrupt(e.to_string(), None)
        }
        _ => AppError::Io(e),
    }
}

pub(crate) fn system_time_to_utc(time: SystemTime) -> DateTime<Utc> {
    DateTime::<Utc>::from(time)
}

pub(crate) fn unix_seconds_to_utc(seconds: u64) -> DateTime<Utc> {
    Utc.timestamp_opt(seconds as i64, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}
