use crate::archive::archive_handler::{
    check_cancelled, expand_inputs, resolve_entry_path, system_time_to_utc,
    write_entry_content, ArchiveHandler, EntryVisitor, InputItem,
};
use crate::archive::atomic_swap::AtomicSwap;
use crate::archive::progress_reporter::{ProgressReporter, ProgressSink};
use crate::error::{AppError, Result};
use crate::models::ArchiveEntry;
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Local, TimeZone, Timelike, Utc};
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Seek, Write};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/**
 * ZIP container handler
 *
 * Entries are Deflate-compressed. Mutations rebuild the container into a
 * temporary sibling file, copying kept entries without recompression, and swap
 * it over the original only after the last entry is written.
 */
#[derive(Debug, Clone, Default)]
pub struct ZipHandler {
    compression_level: Option<i32>,
}

impl ZipHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deflate level; `None` keeps the encoder default
    pub fn with_compression_level(level: Option<i32>) -> Self {
        Self {
            compression_level: level,
        }
    }

    fn file_options(&self, modified: zip::DateTime, large: bool) -> SimpleFileOptions {
        SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .compression_level(self.compression_level.map(i64::from))
            .last_modified_time(modified)
            .large_file(large)
    }

    fn write_item<W: Write + Seek>(&self, writer: &mut ZipWriter<W>, item: &InputItem) -> Result<()> {
        // Directories are represented implicitly by their files' names
        let InputItem::File { source, name } = item else {
            return Ok(());
        };

        let metadata = fs::metadata(source)?;
        let modified = metadata
            .modified()
            .map(|t| to_zip_datetime(system_time_to_utc(t)))
            .unwrap_or_default();
        writer.start_file(
            name.as_str(),
            self.file_options(modified, metadata.len() >= u32::MAX as u64),
        )?;

        let mut input = File::open(source)?;
        std::io::copy(&mut input, writer)?;
        debug!(entry = %name, size = metadata.len(), "Wrote ZIP entry");
        Ok(())
    }

    fn write_inputs<W: Write + Seek>(
        &self,
        writer: &mut ZipWriter<W>,
        groups: &[Vec<InputItem>],
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut reporter = ProgressReporter::new(groups.len() as u64, progress.clone());
        for group in groups {
            for item in group.iter().filter(|item| item.is_file()) {
                check_cancelled(cancel)?;
                self.write_item(writer, item)?;
            }
            reporter.inc();
        }
        Ok(())
    }

    fn create_blocking(
        &self,
        archive: &Path,
        inputs: &[PathBuf],
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let groups = expand_inputs(inputs)?;
        let swap = AtomicSwap::new(archive)?;
        let mut writer = ZipWriter::new(BufWriter::new(swap.file()?));

        self.write_inputs(&mut writer, &groups, progress, cancel)?;

        writer.finish()?.flush()?;
        swap.commit()
    }

    fn add_blocking(
        &self,
        archive: &Path,
        inputs: &[PathBuf],
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let groups = expand_inputs(inputs)?;
        let replaced: HashSet<&str> = groups
            .iter()
            .flatten()
            .filter(|item| item.is_file())
            .map(|item| item.name())
            .collect();

        let mut reader = open_zip(archive)?;
        let swap = AtomicSwap::new(archive)?;
        let mut writer = ZipWriter::new(BufWriter::new(swap.file()?));

        for index in 0..reader.len() {
            check_cancelled(cancel)?;
            let entry = reader.by_index_raw(index)?;
            if replaced.contains(entry.name()) {
                debug!(entry = %entry.name(), "Replacing existing ZIP entry");
                continue;
            }
            writer.raw_copy_file(entry)?;
        }

        self.write_inputs(&mut writer, &groups, progress, cancel)?;

        writer.finish()?.flush()?;
        drop(reader);
        swap.commit()
    }

    fn delete_blocking(
        &self,
        archive: &Path,
        names: &[String],
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let doomed: HashSet<&str> = names.iter().map(String::as_str).collect();
        let mut reader = open_zip(archive)?;

        let matched = reader.file_names().filter(|n| doomed.contains(n)).count();
        let mut reporter = ProgressReporter::new(matched as u64, progress.clone());

        let swap = AtomicSwap::new(archive)?;
        let mut writer = ZipWriter::new(BufWriter::new(swap.file()?));

        for index in 0..reader.len() {
            check_cancelled(cancel)?;
            let entry = reader.by_index_raw(index)?;
            if doomed.contains(entry.name()) {
                debug!(entry = %entry.name(), "Dropping ZIP entry");
                reporter.inc();
                continue;
            }
            writer.raw_copy_file(entry)?;
        }

        writer.finish()?.flush()?;
        drop(reader);
        swap.commit()
    }

    fn extract_blocking(
        archive: &Path,
        destination: &Path,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<()> {
        fs::create_dir_all(destination)?;
        let mut reader = open_zip(archive)?;
        let mut reporter = ProgressReporter::new(reader.len() as u64, progress.clone());

        for index in 0..reader.len() {
            check_cancelled(cancel)?;
            let mut entry = reader.by_index(index)?;
            let name = entry.name().to_string();
            let target = resolve_entry_path(destination, &name)?;

            if name.ends_with('/') {
                fs::create_dir_all(&target)?;
            } else {
                write_entry_content(&mut entry, &target)?;
            }
            reporter.inc();
        }
        Ok(())
    }

    fn entries_blocking(
        archive: &Path,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<Vec<ArchiveEntry>> {
        let mut reader = open_zip(archive)?;
        let mut reporter = ProgressReporter::new(reader.len() as u64, progress.clone());
        let mut entries = Vec::with_capacity(reader.len());

        for index in 0..reader.len() {
            check_cancelled(cancel)?;
            let entry = reader.by_index_raw(index)?;
            entries.push(describe(&entry));
            reporter.inc();
        }
        Ok(entries)
    }

    fn visit_blocking<V: EntryVisitor>(
        archive: &Path,
        visitor: &mut V,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut reader = open_zip(archive)?;
        let mut reporter = ProgressReporter::new(reader.len() as u64, progress.clone());

        for index in 0..reader.len() {
            check_cancelled(cancel)?;
            let mut file = reader.by_index(index)?;
            let entry = describe(&file);
            if entry.is_directory {
                visitor.visit(&entry, None)?;
            } else {
                visitor.visit(&entry, Some(&mut file as &mut dyn Read))?;
            }
            reporter.inc();
        }
        Ok(())
    }
}

#[async_trait]
impl ArchiveHandler for ZipHandler {
    async fn create(
        &self,
        archive: &Path,
        inputs: &[PathBuf],
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let handler = self.clone();
        let archive_display = archive.display().to_string();
        let archive = archive.to_path_buf();
        let inputs = inputs.to_vec();
        let progress = progress.clone();
        let cancel = cancel.clone();

        tokio::task::spawn_blocking(move || {
            handler
                .create_blocking(&archive, &inputs, &progress, &cancel)
                .map_err(|e| e.with_path(&archive))
        })
        .await??;
        info!(archive = %archive_display, "ZIP archive created");
        Ok(())
    }

    async fn add_files(
        &self,
        archive: &Path,
        inputs: &[PathBuf],
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let handler = self.clone();
        let archive = archive.to_path_buf();
        let inputs = inputs.to_vec();
        let progress = progress.clone();
        let cancel = cancel.clone();

        tokio::task::spawn_blocking(move || {
            handler
                .add_blocking(&archive, &inputs, &progress, &cancel)
                .map_err(|e| e.with_path(&archive))
        })
        .await?
    }

    async fn delete_files(
        &self,
        archive: &Path,
        names: &[String],
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let handler = self.clone();
        let archive = archive.to_path_buf();
        let names = names.to_vec();
        let progress = progress.clone();
        let cancel = cancel.clone();

        tokio::task::spawn_blocking(move || {
            handler
                .delete_blocking(&archive, &names, &progress, &cancel)
                .map_err(|e| e.with_path(&archive))
        })
        .await?
    }

    async fn extract_all(
        &self,
        archive: &Path,
        destination: &Path,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let archive = archive.to_path_buf();
        let destination = destination.to_path_buf();
        let progress = progress.clone();
        let cancel = cancel.clone();

        tokio::task::spawn_blocking(move || {
            Self::extract_blocking(&archive, &destination, &progress, &cancel)
                .map_err(|e| e.with_path(&archive))
        })
        .await?
    }

    async fn get_entries(
        &self,
        archive: &Path,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<Vec<ArchiveEntry>> {
        let archive = archive.to_path_buf();
        let progress = progress.clone();
        let cancel = cancel.clone();

        tokio::task::spawn_blocking(move || {
            Self::entries_blocking(&archive, &progress, &cancel).map_err(|e| e.with_path(&archive))
        })
        .await?
    }

    async fn accept_visitor<V>(
        &self,
        archive: &Path,
        mut visitor: V,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<V>
    where
        V: EntryVisitor + 'static,
    {
        let archive = archive.to_path_buf();
        let progress = progress.clone();
        let cancel = cancel.clone();

        tokio::task::spawn_blocking(move || {
            Self::visit_blocking(&archive, &mut visitor, &progress, &cancel)
                .map_err(|e| e.with_path(&archive))?;
            Ok(visitor)
        })
        .await?
    }
}

fn open_zip(archive: &Path) -> Result<ZipArchive<BufReader<File>>> {
    let file = File::open(archive)?;
    ZipArchive::new(BufReader::new(file)).map_err(|e| {
        AppError::corrupt(
            format!("Failed to open ZIP archive: {}", e),
            Some(archive.to_path_buf()),
        )
    })
}

fn describe(file: &zip::read::ZipFile<'_>) -> ArchiveEntry {
    ArchiveEntry {
        full_name: file.name().to_string(),
        compressed_size: file.compressed_size(),
        uncompressed_size: file.size(),
        last_modified: file
            .last_modified()
            .map(from_zip_datetime)
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
        is_directory: file.name().ends_with('/'),
    }
}

/// ZIP timestamps are local wall-clock time with two-second precision
pub(crate) fn from_zip_datetime(value: zip::DateTime) -> DateTime<Utc> {
    Local
        .with_ymd_and_hms(
            value.year() as i32,
            value.month() as u32,
            value.day() as u32,
            value.hour() as u32,
            value.minute() as u32,
            value.second() as u32,
        )
        .earliest()
        .map(|local| local.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

pub(crate) fn to_zip_datetime(value: DateTime<Utc>) -> zip::DateTime {
    let local = value.with_timezone(&Local);
    u16::try_from(local.year())
        .ok()
        .and_then(|year| {
            zip::DateTime::from_date_and_time(
                year,
                local.month() as u8,
                local.day() as u8,
                local.hour() as u8,
                local.minute() as u8,
                local.second() as u8,
            )
            .ok()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    async fn names(handler: &ZipHandler, archive: &Path) -> Vec<String> {
        handler
            .get_entries(archive, &ProgressSink::none(), &CancellationToken::new())
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.full_name)
            .collect()
    }

    #[tokio::test]
    async fn test_create_and_list() {
        let temp_dir = TempDir::new().unwrap();
        let a = write(temp_dir.path(), "a.txt", "hi");
        let b = write(temp_dir.path(), "b.txt", "yo!");
        let archive = temp_dir.path().join("out.zip");

        let handler = ZipHandler::new();
        handler
            .create(&archive, &[a, b], &ProgressSink::none(), &CancellationToken::new())
            .await
            .unwrap();

        let entries = handler
            .get_entries(&archive, &ProgressSink::none(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].full_name, "a.txt");
        assert_eq!(entries[0].uncompressed_size, 2);
        assert_eq!(entries[1].full_name, "b.txt");
        assert_eq!(entries[1].uncompressed_size, 3);
        assert!(entries.iter().all(|e| !e.is_directory));
    }

    #[tokio::test]
    async fn test_create_directory_stores_relative_files_only() {
        let temp_dir = TempDir::new().unwrap();
        write(temp_dir.path(), "docs/readme.md", "r");
        write(temp_dir.path(), "docs/img/logo.svg", "<svg/>");
        let archive = temp_dir.path().join("docs.zip");

        let handler = ZipHandler::new();
        handler
            .create(
                &archive,
                &[temp_dir.path().join("docs")],
                &ProgressSink::none(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(
            names(&handler, &archive).await,
            vec!["docs/img/logo.svg".to_string(), "docs/readme.md".to_string()]
        );
    }

    #[tokio::test]
    async fn test_add_replaces_same_name() {
        let temp_dir = TempDir::new().unwrap();
        let a = write(temp_dir.path(), "a.txt", "hi");
        let b = write(temp_dir.path(), "b.txt", "yo!");
        let archive = temp_dir.path().join("out.zip");
        let handler = ZipHandler::new();
        let cancel = CancellationToken::new();

        handler
            .create(&archive, &[a.clone(), b], &ProgressSink::none(), &cancel)
            .await
            .unwrap();
        fs::write(&a, "replaced").unwrap();
        handler
            .add_files(&archive, &[a], &ProgressSink::none(), &cancel)
            .await
            .unwrap();

        let entries = handler
            .get_entries(&archive, &ProgressSink::none(), &cancel)
            .await
            .unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].full_name, "b.txt");
        assert_eq!(entries[1].full_name, "a.txt");
        assert_eq!(entries[1].uncompressed_size, 8);
    }

    #[tokio::test]
    async fn test_delete_and_extract() {
        let temp_dir = TempDir::new().unwrap();
        let a = write(temp_dir.path(), "a.txt", "hi");
        let b = write(temp_dir.path(), "b.txt", "yo!");
        let archive = temp_dir.path().join("out.zip");
        let handler = ZipHandler::new();
        let cancel = CancellationToken::new();

        handler
            .create(&archive, &[a, b], &ProgressSink::none(), &cancel)
            .await
            .unwrap();
        handler
            .delete_files(
                &archive,
                &["a.txt".to_string(), "missing.txt".to_string()],
                &ProgressSink::none(),
                &cancel,
            )
            .await
            .unwrap();
        assert_eq!(names(&handler, &archive).await, vec!["b.txt".to_string()]);

        let out = temp_dir.path().join("out");
        handler
            .extract_all(&archive, &out, &ProgressSink::none(), &cancel)
            .await
            .unwrap();
        assert_eq!(fs::read_to_string(out.join("b.txt")).unwrap(), "yo!");
        assert!(!out.join("a.txt").exists());
    }

    #[tokio::test]
    async fn test_progress_is_monotonic_and_bounded() {
        let temp_dir = TempDir::new().unwrap();
        let inputs: Vec<PathBuf> = (0..4)
            .map(|i| write(temp_dir.path(), &format!("f{i}.txt"), "data"))
            .collect();
        let archive = temp_dir.path().join("out.zip");

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let sink = ProgressSink::new(move |v| seen_clone.lock().unwrap().push(v));

        ZipHandler::new()
            .create(&archive, &inputs, &sink, &CancellationToken::new())
            .await
            .unwrap();

        let values = seen.lock().unwrap().clone();
        assert_eq!(values, vec![25, 50, 75, 100]);
    }

    #[tokio::test]
    async fn test_cancelled_delete_leaves_original() {
        let temp_dir = TempDir::new().unwrap();
        let a = write(temp_dir.path(), "a.txt", "hi");
        let archive = temp_dir.path().join("out.zip");
        let handler = ZipHandler::new();

        handler
            .create(&archive, &[a], &ProgressSink::none(), &CancellationToken::new())
            .await
            .unwrap();
        let before = fs::read(&archive).unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = handler
            .delete_files(&archive, &["a.txt".to_string()], &ProgressSink::none(), &cancel)
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(fs::read(&archive).unwrap(), before);
        let leftovers = fs::read_dir(temp_dir.path())
            .unwrap()
            .filter(|e| e.as_ref().unwrap().file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_delete_cancelled_mid_write_keeps_original() {
        let temp_dir = TempDir::new().unwrap();
        let inputs: Vec<PathBuf> = ["a.txt", "b.txt", "c.txt"]
            .iter()
            .map(|n| write(temp_dir.path(), n, n))
            .collect();
        let archive = temp_dir.path().join("out.zip");
        let handler = ZipHandler::new();
        handler
            .create(&archive, &inputs, &ProgressSink::none(), &CancellationToken::new())
            .await
            .unwrap();
        let before = fs::read(&archive).unwrap();

        // The first matched deletion reports progress; the next entry sees the cancel
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let sink = ProgressSink::new(move |_| trigger.cancel());
        let err = handler
            .delete_files(&archive, &["a.txt".to_string(), "b.txt".to_string()], &sink, &cancel)
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(fs::read(&archive).unwrap(), before);
        let leftovers = fs::read_dir(temp_dir.path())
            .unwrap()
            .filter(|e| e.as_ref().unwrap().file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_garbage_is_corrupt() {
        let temp_dir = TempDir::new().unwrap();
        let archive = write(temp_dir.path(), "bad.zip", "definitely not a zip");

        let err = ZipHandler::new()
            .get_entries(&archive, &ProgressSink::none(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::CorruptOrUnreadable { .. }));
    }

    #[test]
    fn test_zip_datetime_conversion_keeps_seconds_to_two() {
        let now = Utc.with_ymd_and_hms(2024, 5, 17, 10, 30, 42).unwrap();
        let back = from_zip_datetime(to_zip_datetime(now));
        assert!((back - now).num_seconds().abs() <= 2);
    }

    #[test]
    fn test_pre_1980_time_falls_back() {
        let old = Utc.with_ymd_and_hms(1970, 1, 2, 0, 0, 0).unwrap();
        let converted = to_zip_datetime(old);
        assert_eq!(converted.year(), 1980);
    }
}
