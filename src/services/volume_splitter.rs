//! Splits a file into fixed-size numbered parts and joins them back
//!
//! Parts sit next to the source and are named `<file name>.part001`,
//! `.part002`, ... The splitter knows nothing about archive formats; any file
//! can be split.

use crate::archive::archive_handler::check_cancelled;
use crate::archive::{AtomicSwap, ProgressReporter, ProgressSink};
use crate::error::{AppError, Result};
use crate::models::VolumeInfo;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Read buffer for both directions (80 KiB)
pub const DEFAULT_BUFFER_SIZE: usize = 81_920;

const FIRST_PART_SUFFIX: &str = ".part001";

#[derive(Debug, Clone)]
pub struct VolumeSplitter {
    buffer_size: usize,
}

impl Default for VolumeSplitter {
    fn default() -> Self {
        Self::new()
    }
}

impl VolumeSplitter {
    pub fn new() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    pub fn with_buffer_size(buffer_size: usize) -> Self {
        Self {
            buffer_size: buffer_size.max(1),
        }
    }

    /// Path of part `number` (1-based) for `source`
    pub fn part_path(source: &Path, number: u32) -> PathBuf {
        let file_name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        source.with_file_name(format!("{}.part{:03}", file_name, number))
    }

    /// Default merge target: the first volume's name without `.part001`
    pub fn merged_path(first_volume: &Path) -> PathBuf {
        let file_name = first_volume
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let base = file_name
            .strip_suffix(FIRST_PART_SUFFIX)
            .unwrap_or(&file_name)
            .to_string();
        first_volume.with_file_name(base)
    }

    /**
     * Splits `source` into parts of exactly `volume_size` bytes, the last part
     * holding the remainder
     *
     * Progress is bytes read over total size. On failure or cancellation every
     * part written so far is removed.
     */
    pub async fn split(
        &self,
        source: &Path,
        volume_size: u64,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<Vec<PathBuf>> {
        let total = existing_file_len(source).await?;
        if volume_size == 0 {
            return Err(AppError::invalid_argument("Volume size must be positive"));
        }

        info!(source = %source.display(), volume_size, total, "Splitting file into volumes");

        let mut parts = Vec::new();
        match self
            .split_into(source, volume_size, total, &mut parts, progress, cancel)
            .await
        {
            Ok(()) => {
                info!(source = %source.display(), parts = parts.len(), "Split completed");
                Ok(parts)
            }
            Err(e) => {
                for part in &parts {
                    if let Err(remove_err) = fs::remove_file(part).await {
                        warn!(part = %part.display(), error = %remove_err, "Failed to remove partial volume");
                    }
                }
                Err(e)
            }
        }
    }

    async fn split_into(
        &self,
        source: &Path,
        volume_size: u64,
        total: u64,
        parts: &mut Vec<PathBuf>,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut input = File::open(source).await?;
        let mut buffer = vec![0u8; self.buffer_size];
        let mut reporter = ProgressReporter::new(total, progress.clone());
        let mut read_total = 0u64;
        let mut number = 1u32;

        while read_total < total {
            check_cancelled(cancel)?;
            let part = Self::part_path(source, number);
            let mut output = File::create(&part).await?;
            parts.push(part.clone());

            let mut written = 0u64;
            while written < volume_size && read_total < total {
                check_cancelled(cancel)?;
                let want = (buffer.len() as u64)
                    .min(volume_size - written)
                    .min(total - read_total) as usize;
                let read = input.read(&mut buffer[..want]).await?;
                if read == 0 {
                    return Err(AppError::Io(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("{} shrank while being split", source.display()),
                    )));
                }
                output.write_all(&buffer[..read]).await?;
                written += read as u64;
                read_total += read as u64;
                reporter.add(read as u64);
            }

            output.flush().await?;
            debug!(part = %part.display(), bytes = written, "Volume written");
            number += 1;
        }
        Ok(())
    }

    /**
     * Concatenates `.part001`, `.part002`, ... into `output`
     *
     * Parts are discovered by probing consecutive numbers until one is
     * missing. The output is staged in a temporary file and only appears at
     * its final path once every byte has been written.
     */
    pub async fn merge(
        &self,
        first_volume: &Path,
        output: Option<&Path>,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        match existing_file_len(first_volume).await {
            Err(AppError::ArchiveNotFound(_)) => {
                return Err(AppError::invalid_argument(format!(
                    "First volume file not found: {}",
                    first_volume.display()
                )));
            }
            other => {
                other?;
            }
        }
        let output = output
            .map(Path::to_path_buf)
            .unwrap_or_else(|| Self::merged_path(first_volume));

        let info = self.volume_info(first_volume).await?;
        if info.parts.is_empty() {
            return Err(AppError::invalid_argument(format!(
                "No volume parts found for {}",
                first_volume.display()
            )));
        }

        info!(
            first_volume = %first_volume.display(),
            output = %output.display(),
            parts = info.part_count,
            "Merging volumes"
        );

        let swap = AtomicSwap::new(&output)?;
        {
            let mut writer = OpenOptions::new()
                .write(true)
                .truncate(true)
                .open(swap.temp_path())
                .await?;
            let mut buffer = vec![0u8; self.buffer_size];
            let mut reporter = ProgressReporter::new(info.total_size, progress.clone());

            for part in &info.parts {
                check_cancelled(cancel)?;
                let mut reader = File::open(part).await?;
                loop {
                    check_cancelled(cancel)?;
                    let read = reader.read(&mut buffer).await?;
                    if read == 0 {
                        break;
                    }
                    writer.write_all(&buffer[..read]).await?;
                    reporter.add(read as u64);
                }
                debug!(part = %part.display(), "Volume appended");
            }
            writer.flush().await?;
            writer.sync_all().await?;
        }
        swap.commit()?;

        info!(output = %output.display(), bytes = info.total_size, "Merge completed");
        Ok(output)
    }

    /// Counts and sizes the parts that `merge` would join, without reading them
    pub async fn volume_info(&self, first_volume: &Path) -> Result<VolumeInfo> {
        let base = Self::merged_path(first_volume);
        let mut parts = Vec::new();
        let mut total_size = 0u64;
        let mut number = 1u32;

        loop {
            let part = Self::part_path(&base, number);
            match fs::metadata(&part).await {
                Ok(metadata) if metadata.is_file() => {
                    total_size += metadata.len();
                    parts.push(part);
                    number += 1;
                }
                _ => break,
            }
        }

        Ok(VolumeInfo {
            part_count: parts.len() as u32,
            total_size,
            parts,
        })
    }
}

async fn existing_file_len(path: &Path) -> Result<u64> {
    match fs::metadata(path).await {
        Ok(metadata) if metadata.is_file() => Ok(metadata.len()),
        Ok(_) => Err(AppError::ArchiveNotFound(path.to_path_buf())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            Err(AppError::ArchiveNotFound(path.to_path_buf()))
        }
        Err(e) => Err(AppError::Io(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    fn sample_bytes(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_part_naming() {
        let source = Path::new("/data/backup.zip");
        assert_eq!(
            VolumeSplitter::part_path(source, 1),
            PathBuf::from("/data/backup.zip.part001")
        );
        assert_eq!(
            VolumeSplitter::part_path(source, 12),
            PathBuf::from("/data/backup.zip.part012")
        );
        assert_eq!(
            VolumeSplitter::merged_path(Path::new("/data/backup.zip.part001")),
            PathBuf::from("/data/backup.zip")
        );
    }

    #[tokio::test]
    async fn test_split_sizes_and_merge() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("data.bin");
        let content = sample_bytes(250);
        std::fs::write(&source, &content).unwrap();

        let splitter = VolumeSplitter::with_buffer_size(64);
        let cancel = CancellationToken::new();
        let parts = splitter
            .split(&source, 100, &ProgressSink::none(), &cancel)
            .await
            .unwrap();

        assert_eq!(parts.len(), 3);
        let sizes: Vec<u64> = parts
            .iter()
            .map(|p| std::fs::metadata(p).unwrap().len())
            .collect();
        assert_eq!(sizes, vec![100, 100, 50]);

        std::fs::remove_file(&source).unwrap();
        let merged = splitter
            .merge(&parts[0], None, &ProgressSink::none(), &cancel)
            .await
            .unwrap();
        assert_eq!(merged, source);
        assert_eq!(std::fs::read(&merged).unwrap(), content);
    }

    #[tokio::test]
    async fn test_split_progress_reaches_100() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("data.bin");
        std::fs::write(&source, sample_bytes(1000)).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let sink = ProgressSink::new(move |v| seen_clone.lock().unwrap().push(v));

        VolumeSplitter::with_buffer_size(100)
            .split(&source, 300, &sink, &CancellationToken::new())
            .await
            .unwrap();

        let values = seen.lock().unwrap().clone();
        assert_eq!(values.last(), Some(&100));
        assert!(values.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn test_split_rejects_bad_arguments() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("data.bin");
        std::fs::write(&source, b"abc").unwrap();
        let splitter = VolumeSplitter::new();
        let cancel = CancellationToken::new();

        let err = splitter
            .split(&source, 0, &ProgressSink::none(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidArgument(_)));

        let err = splitter
            .split(&temp_dir.path().join("missing.bin"), 10, &ProgressSink::none(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ArchiveNotFound(_)));
    }

    #[tokio::test]
    async fn test_cancelled_split_removes_parts() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("data.bin");
        std::fs::write(&source, sample_bytes(500)).unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let sink = ProgressSink::new(move |v| {
            if v >= 40 {
                trigger.cancel();
            }
        });

        let err = VolumeSplitter::with_buffer_size(50)
            .split(&source, 100, &sink, &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());

        let leftovers: Vec<String> = std::fs::read_dir(temp_dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(leftovers, vec!["data.bin".to_string()]);
    }

    #[tokio::test]
    async fn test_merge_missing_first_volume_is_invalid_argument() {
        let temp_dir = TempDir::new().unwrap();
        let first = temp_dir.path().join("x.zip.part001");

        let err = VolumeSplitter::new()
            .merge(&first, None, &ProgressSink::none(), &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            AppError::InvalidArgument(message) => {
                assert!(message.contains("First volume file not found"))
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_merge_without_parts() {
        let temp_dir = TempDir::new().unwrap();
        let lonely = temp_dir.path().join("lonely.zip");
        std::fs::write(&lonely, b"x").unwrap();

        let err = VolumeSplitter::new()
            .merge(&lonely, None, &ProgressSink::none(), &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            AppError::InvalidArgument(message) => assert!(message.contains("No volume parts found")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_merge_stops_at_first_gap() {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path().join("a.tar");
        std::fs::write(VolumeSplitter::part_path(&base, 1), b"12").unwrap();
        std::fs::write(VolumeSplitter::part_path(&base, 2), b"34").unwrap();
        std::fs::write(VolumeSplitter::part_path(&base, 4), b"99").unwrap();

        let splitter = VolumeSplitter::new();
        let first = VolumeSplitter::part_path(&base, 1);
        let info = splitter.volume_info(&first).await.unwrap();
        assert_eq!(info.part_count, 2);
        assert_eq!(info.total_size, 4);

        let output = temp_dir.path().join("joined.tar");
        let merged = splitter
            .merge(&first, Some(&output), &ProgressSink::none(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(merged, output);
        assert_eq!(std::fs::read(&output).unwrap(), b"1234");
    }
}
