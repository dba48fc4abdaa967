use crate::archive::archive_handler::{
    check_cancelled, expand_inputs, map_read_error, resolve_entry_path, system_time_to_utc,
    unix_seconds_to_utc, write_entry_content, ArchiveHandler, EntryVisitor, InputItem,
};
use crate::archive::atomic_swap::AtomicSwap;
use crate::archive::progress_reporter::{report_unbounded, ProgressReporter, ProgressSink};
use crate::error::{AppError, Result};
use crate::models::ArchiveEntry;
use async_trait::async_trait;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tar::{Archive, Builder, EntryType, Header};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];

type TarStream = Box<dyn Read + Send>;

/**
 * TAR and TAR.GZ container handler
 *
 * Reading sniffs the first two bytes for the gzip magic, so a plain-TAR handler
 * still reads a gzipped file. Mutations decode the whole container into memory
 * and re-encode it, keeping regular files and directories.
 */
#[derive(Debug, Clone)]
pub struct TarHandler {
    gzip: bool,
    gzip_level: u32,
}

/// One decoded entry held in memory during a rewrite
#[derive(Debug)]
struct BufferedEntry {
    name: String,
    is_directory: bool,
    mode: u32,
    mtime: u64,
    data: Vec<u8>,
}

/// Output stage of the encoder, optionally gzip-compressed
enum TarSink {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

impl Write for TarSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            TarSink::Plain(w) => w.write(buf),
            TarSink::Gzip(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            TarSink::Plain(w) => w.flush(),
            TarSink::Gzip(w) => w.flush(),
        }
    }
}

impl TarSink {
    fn finish(self) -> io::Result<()> {
        match self {
            TarSink::Plain(mut w) => w.flush(),
            TarSink::Gzip(encoder) => encoder.finish()?.flush(),
        }
    }
}

impl TarHandler {
    pub fn plain() -> Self {
        Self {
            gzip: false,
            gzip_level: Compression::best().level(),
        }
    }

    pub fn gzip() -> Self {
        Self {
            gzip: true,
            ..Self::plain()
        }
    }

    pub fn with_gzip_level(mut self, level: u32) -> Self {
        self.gzip_level = level.min(9);
        self
    }

    pub fn is_gzip(&self) -> bool {
        self.gzip
    }

    fn open_stream(&self, archive: &Path) -> Result<Option<TarStream>> {
        let mut file = File::open(archive)?;
        if file.metadata()?.len() == 0 {
            debug!(archive = %archive.display(), "Zero-length TAR, treating as empty");
            return Ok(None);
        }

        let mut magic = Vec::with_capacity(2);
        (&mut file).take(2).read_to_end(&mut magic)?;
        file.seek(SeekFrom::Start(0))?;

        let reader = BufReader::new(file);
        if self.gzip || magic == GZIP_MAGIC {
            Ok(Some(Box::new(GzDecoder::new(reader))))
        } else {
            Ok(Some(Box::new(reader)))
        }
    }

    fn open_sink(&self, file: File) -> TarSink {
        let writer = BufWriter::new(file);
        if self.gzip {
            TarSink::Gzip(GzEncoder::new(writer, Compression::new(self.gzip_level)))
        } else {
            TarSink::Plain(writer)
        }
    }

    /// Drives `f` over every entry in order, returning how many were seen
    fn for_each_entry<F>(&self, archive: &Path, cancel: &CancellationToken, mut f: F) -> Result<u64>
    where
        F: FnMut(ArchiveEntry, &mut tar::Entry<'_, TarStream>) -> Result<()>,
    {
        let Some(stream) = self.open_stream(archive)? else {
            return Ok(0);
        };
        let mut tar = Archive::new(stream);
        let mut entries = tar.entries().map_err(map_tar_error)?;
        let mut processed = 0u64;

        loop {
            check_cancelled(cancel)?;
            let Some(entry) = entries.next() else {
                break;
            };
            let mut entry = entry.map_err(map_tar_error)?;
            let description = describe(&entry);
            f(description, &mut entry)?;
            processed += 1;
        }
        Ok(processed)
    }

    fn read_buffered<K>(&self, archive: &Path, cancel: &CancellationToken, keep: K) -> Result<Vec<BufferedEntry>>
    where
        K: Fn(&str) -> bool,
    {
        let mut buffered = Vec::new();
        self.for_each_entry(archive, cancel, |description, entry| {
            if !keep(&description.full_name) {
                debug!(entry = %description.full_name, "Dropping TAR entry");
                return Ok(());
            }

            let header = entry.header();
            let mode = header.mode().unwrap_or(0o644);
            let mtime = header.mtime().unwrap_or(0);

            if description.is_directory {
                buffered.push(BufferedEntry {
                    name: description.full_name,
                    is_directory: true,
                    mode,
                    mtime,
                    data: Vec::new(),
                });
            } else if header.entry_type().is_file() {
                let mut data = Vec::with_capacity(description.uncompressed_size as usize);
                entry.read_to_end(&mut data).map_err(map_read_error)?;
                buffered.push(BufferedEntry {
                    name: description.full_name,
                    is_directory: false,
                    mode,
                    mtime,
                    data,
                });
            } else {
                warn!(
                    entry = %description.full_name,
                    kind = ?header.entry_type(),
                    "Entry is not a file or directory, dropping it from the rewritten archive"
                );
            }
            Ok(())
        })?;
        Ok(buffered)
    }

    fn append_inputs<W: Write>(
        builder: &mut Builder<W>,
        groups: &[Vec<InputItem>],
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut reporter = ProgressReporter::new(groups.len() as u64, progress.clone());
        for group in groups {
            for item in group {
                check_cancelled(cancel)?;
                match item {
                    InputItem::File { source, name } => {
                        let mut file = File::open(source)?;
                        builder.append_file(name, &mut file)?;
                    }
                    InputItem::Directory { source, name } => {
                        let mtime = fs::metadata(source)
                            .and_then(|m| m.modified())
                            .map(|t| system_time_to_utc(t).timestamp().max(0) as u64)
                            .unwrap_or(0);
                        let mut header = directory_header(0o755, mtime);
                        builder.append_data(&mut header, name, io::empty())?;
                    }
                }
                debug!(entry = %item.name(), "Wrote TAR entry");
            }
            reporter.inc();
        }
        Ok(())
    }

    fn append_buffered<W: Write>(builder: &mut Builder<W>, entry: &BufferedEntry) -> Result<()> {
        if entry.is_directory {
            let mut header = directory_header(entry.mode, entry.mtime);
            builder.append_data(&mut header, &entry.name, io::empty())?;
        } else {
            let mut header = Header::new_gnu();
            header.set_entry_type(EntryType::Regular);
            header.set_size(entry.data.len() as u64);
            header.set_mode(entry.mode);
            header.set_mtime(entry.mtime);
            builder.append_data(&mut header, &entry.name, entry.data.as_slice())?;
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
        let mut builder = Builder::new(self.open_sink(swap.file()?));

        Self::append_inputs(&mut builder, &groups, progress, cancel)?;

        builder.into_inner()?.finish()?;
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
        let replaced: HashSet<&str> = groups.iter().flatten().map(|item| item.name()).collect();
        let existing = self.read_buffered(archive, cancel, |name| !replaced.contains(name))?;

        let swap = AtomicSwap::new(archive)?;
        let mut builder = Builder::new(self.open_sink(swap.file()?));
        for entry in &existing {
            check_cancelled(cancel)?;
            Self::append_buffered(&mut builder, entry)?;
        }
        Self::append_inputs(&mut builder, &groups, progress, cancel)?;

        builder.into_inner()?.finish()?;
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
        let kept = self.read_buffered(archive, cancel, |name| !doomed.contains(name))?;

        let swap = AtomicSwap::new(archive)?;
        let mut builder = Builder::new(self.open_sink(swap.file()?));
        let mut reporter = ProgressReporter::new(kept.len() as u64, progress.clone());
        for entry in &kept {
            check_cancelled(cancel)?;
            Self::append_buffered(&mut builder, entry)?;
            reporter.inc();
        }

        builder.into_inner()?.finish()?;
        swap.commit()
    }

    fn extract_blocking(
        &self,
        archive: &Path,
        destination: &Path,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<()> {
        fs::create_dir_all(destination)?;
        let mut processed = 0u64;
        self.for_each_entry(archive, cancel, |description, entry| {
            let target = resolve_entry_path(destination, &description.full_name)?;
            if description.is_directory {
                fs::create_dir_all(&target)?;
            } else if entry.header().entry_type().is_file() {
                write_entry_content(entry, &target)?;
            } else {
                debug!(entry = %description.full_name, "Skipping non-file TAR entry");
            }
            processed += 1;
            report_unbounded(progress, processed);
            Ok(())
        })?;
        Ok(())
    }

    fn entries_blocking(
        &self,
        archive: &Path,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<Vec<ArchiveEntry>> {
        let mut entries = Vec::new();
        self.for_each_entry(archive, cancel, |description, _entry| {
            entries.push(description);
            report_unbounded(progress, entries.len() as u64);
            Ok(())
        })?;
        Ok(entries)
    }

    fn visit_blocking<V: EntryVisitor>(
        &self,
        archive: &Path,
        visitor: &mut V,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut processed = 0u64;
        self.for_each_entry(archive, cancel, |description, entry| {
            if description.is_directory {
                visitor.visit(&description, None)?;
            } else {
                visitor.visit(&description, Some(entry as &mut dyn Read))?;
            }
            processed += 1;
            report_unbounded(progress, processed);
            Ok(())
        })?;
        Ok(())
    }
}

impl Default for TarHandler {
    fn default() -> Self {
        Self::plain()
    }
}

#[async_trait]
impl ArchiveHandler for TarHandler {
    async fn create(
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
                .create_blocking(&archive, &inputs, &progress, &cancel)
                .map_err(|e| e.with_path(&archive))?;
            info!(archive = %archive.display(), gzip = handler.gzip, "TAR archive created");
            Ok(())
        })
        .await?
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
        let handler = self.clone();
        let archive = archive.to_path_buf();
        let destination = destination.to_path_buf();
        let progress = progress.clone();
        let cancel = cancel.clone();

        tokio::task::spawn_blocking(move || {
            handler
                .extract_blocking(&archive, &destination, &progress, &cancel)
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
        let handler = self.clone();
        let archive = archive.to_path_buf();
        let progress = progress.clone();
        let cancel = cancel.clone();

        tokio::task::spawn_blocking(move || {
            handler
                .entries_blocking(&archive, &progress, &cancel)
                .map_err(|e| e.with_path(&archive))
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
        let handler = self.clone();
        let archive = archive.to_path_buf();
        let progress = progress.clone();
        let cancel = cancel.clone();

        tokio::task::spawn_blocking(move || {
            handler
                .visit_blocking(&archive, &mut visitor, &progress, &cancel)
                .map_err(|e| e.with_path(&archive))?;
            Ok(visitor)
        })
        .await?
    }
}

fn describe<R: Read>(entry: &tar::Entry<'_, R>) -> ArchiveEntry {
    let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
    let header = entry.header();
    let size = header.size().unwrap_or(0);
    let is_directory = header.entry_type().is_dir() || name.ends_with('/');

    ArchiveEntry {
        full_name: name,
        compressed_size: size,
        uncompressed_size: size,
        last_modified: unix_seconds_to_utc(header.mtime().unwrap_or(0)),
        is_directory,
    }
}

fn directory_header(mode: u32, mtime: u64) -> Header {
    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Directory);
    header.set_size(0);
    header.set_mode(mode);
    header.set_mtime(mtime);
    header
}

fn map_tar_error(e: io::Error) -> AppError {
    AppError::corrupt(format!("Failed to read TAR archive: {}", e), None)
}
