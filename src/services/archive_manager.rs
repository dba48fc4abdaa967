//! Archive manager facade
//!
//! Resolves the handler for an archive path, runs the handler operation and
//! keeps the optional metadata repository in step with the result.

use crate::archive::{create_for_with, ArchiveAdapter, ArchiveHandler, ProgressSink};
use crate::error::{AppError, Result};
use crate::infrastructure::config::{ArchiverConfig, CompressionConfig};
use crate::models::{ArchiveEntry, TestResult, VolumeInfo};
use crate::services::archive_repository::{ArchiveRepository, OperationResult, OperationType};
use crate::services::volume_splitter::VolumeSplitter;
use crate::visitors::{ChecksumVisitor, IntegrityVisitor};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const DEFAULT_VOLUME_SIZE: u64 = 100 * 1024 * 1024;

/**
 * Single entry point for archive operations
 *
 * Mutations return the archive's new checksum. When a repository is
 * configured, every mutation refreshes the stored checksum and entry list and
 * appends an audit record; without one those steps are skipped.
 */
#[derive(Clone)]
pub struct ArchiveManager {
    repository: Option<Arc<dyn ArchiveRepository>>,
    compression: CompressionConfig,
    splitter: VolumeSplitter,
    default_volume_size: u64,
}

impl ArchiveManager {
    pub fn new(repository: Option<Arc<dyn ArchiveRepository>>) -> Self {
        Self {
            repository,
            compression: CompressionConfig::default(),
            splitter: VolumeSplitter::new(),
            default_volume_size: DEFAULT_VOLUME_SIZE,
        }
    }

    /// A manager without metadata or audit
    pub fn standalone() -> Self {
        Self::new(None)
    }

    pub fn from_config(
        config: &ArchiverConfig,
        repository: Option<Arc<dyn ArchiveRepository>>,
    ) -> Self {
        Self {
            repository,
            compression: config.compression.clone(),
            splitter: VolumeSplitter::new(),
            default_volume_size: config.default_volume_size_bytes(),
        }
    }

    pub fn with_compression(mut self, compression: CompressionConfig) -> Self {
        self.compression = compression;
        self
    }

    pub fn has_repository(&self) -> bool {
        self.repository.is_some()
    }

    pub fn default_volume_size(&self) -> u64 {
        self.default_volume_size
    }

    pub async fn create_archive(
        &self,
        archive: &Path,
        inputs: &[PathBuf],
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let adapter = self.adapter_for(archive)?;
        info!(archive = %archive.display(), format = %adapter.format(), inputs = inputs.len(), "Creating archive");

        if let Err(e) = adapter.create(archive, inputs, progress, cancel).await {
            return Err(self.audit_failure(archive, OperationType::Create, e).await);
        }

        self.record_mutation(archive, &adapter, OperationType::Create, |checksum| {
            format!("Checksum: {}", checksum)
        })
        .await
    }

    pub async fn add_files(
        &self,
        archive: &Path,
        inputs: &[PathBuf],
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<String> {
        ensure_exists(archive).await?;
        let adapter = self.adapter_for(archive)?;
        info!(archive = %archive.display(), inputs = inputs.len(), "Adding files to archive");

        if let Err(e) = adapter.add_files(archive, inputs, progress, cancel).await {
            return Err(self.audit_failure(archive, OperationType::AddFiles, e).await);
        }

        self.record_mutation(archive, &adapter, OperationType::AddFiles, |checksum| {
            format!("Added {} files. New checksum: {}", inputs.len(), checksum)
        })
        .await
    }

    pub async fn delete_files(
        &self,
        archive: &Path,
        names: &[String],
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<String> {
        ensure_exists(archive).await?;
        let adapter = self.adapter_for(archive)?;
        info!(archive = %archive.display(), names = names.len(), "Deleting entries from archive");

        if let Err(e) = adapter.delete_files(archive, names, progress, cancel).await {
            return Err(self.audit_failure(archive, OperationType::DeleteFiles, e).await);
        }

        self.record_mutation(archive, &adapter, OperationType::DeleteFiles, |checksum| {
            format!("Deleted {} files. New checksum: {}", names.len(), checksum)
        })
        .await
    }

    pub async fn extract_archive(
        &self,
        archive: &Path,
        destination: &Path,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<()> {
        ensure_exists(archive).await?;
        let adapter = self.adapter_for(archive)?;
        info!(archive = %archive.display(), destination = %destination.display(), "Extracting archive");

        if let Err(e) = adapter
            .extract_all(archive, destination, progress, cancel)
            .await
        {
            return Err(self.audit_failure(archive, OperationType::Extract, e).await);
        }

        let metadata = format!("Extracted to: {}", destination.display());
        self.log_success(archive, OperationType::Extract, OperationResult::Success, &metadata)
            .await
    }

    pub async fn list_entries(
        &self,
        archive: &Path,
        cancel: &CancellationToken,
    ) -> Result<Vec<ArchiveEntry>> {
        ensure_exists(archive).await?;
        let adapter = self.adapter_for(archive)?;
        adapter
            .get_entries(archive, &ProgressSink::none(), cancel)
            .await
    }

    /**
     * Reads every entry in full and reports the ones that fail
     *
     * Per-entry read failures end up in the returned result. An archive that
     * cannot be opened at all is an error.
     */
    pub async fn test_archive(
        &self,
        archive: &Path,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<TestResult> {
        ensure_exists(archive).await?;
        let adapter = self.adapter_for(archive)?;
        info!(archive = %archive.display(), "Testing archive integrity");

        let result = match adapter
            .accept_visitor(archive, IntegrityVisitor::new(), progress, cancel)
            .await
        {
            Ok(visitor) => visitor.finish(),
            Err(e) => return Err(self.audit_failure(archive, OperationType::Test, e).await),
        };

        info!(
            archive = %archive.display(),
            valid = result.is_valid,
            entries = result.entries_checked,
            "Integrity test finished"
        );

        let outcome = if result.is_valid {
            OperationResult::Success
        } else {
            OperationResult::Failed
        };
        let metadata = format!(
            "Checked {} entries. Valid: {}",
            result.entries_checked, result.is_valid
        );
        self.log_success(archive, OperationType::Test, outcome, &metadata)
            .await?;

        Ok(result)
    }

    pub async fn calculate_checksum(
        &self,
        archive: &Path,
        cancel: &CancellationToken,
    ) -> Result<String> {
        ensure_exists(archive).await?;
        let adapter = self.adapter_for(archive)?;
        checksum_of(&adapter, archive, cancel).await
    }

    /// Splits `archive` into numbered parts; `None` uses the configured default size
    pub async fn split_archive(
        &self,
        archive: &Path,
        volume_size: Option<u64>,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<Vec<PathBuf>> {
        let volume_size = volume_size.unwrap_or(self.default_volume_size);

        let parts = match self
            .splitter
            .split(archive, volume_size, progress, cancel)
            .await
        {
            Ok(parts) => parts,
            Err(e) => return Err(self.audit_failure(archive, OperationType::Split, e).await),
        };

        let metadata = format!(
            "Created {} volumes of {} bytes",
            parts.len(),
            volume_size
        );
        self.log_success(archive, OperationType::Split, OperationResult::Success, &metadata)
            .await?;
        Ok(parts)
    }

    /// Joins the parts that follow `first_volume`; the audit record is keyed by the output
    pub async fn merge_volumes(
        &self,
        first_volume: &Path,
        output: Option<&Path>,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        let target = output
            .map(Path::to_path_buf)
            .unwrap_or_else(|| VolumeSplitter::merged_path(first_volume));

        let merged = match self
            .splitter
            .merge(first_volume, output, progress, cancel)
            .await
        {
            Ok(merged) => merged,
            Err(e) => return Err(self.audit_failure(&target, OperationType::Merge, e).await),
        };

        let metadata = format!("Merged from: {}", first_volume.display());
        self.log_success(&merged, OperationType::Merge, OperationResult::Success, &metadata)
            .await?;
        Ok(merged)
    }

    pub async fn volume_info(&self, first_volume: &Path) -> Result<VolumeInfo> {
        self.splitter.volume_info(first_volume).await
    }

    /// Drops the stored metadata for `archive`; the archive file is untouched
    pub async fn forget_archive(&self, archive: &Path) -> Result<()> {
        let Some(repository) = &self.repository else {
            return Ok(());
        };

        repository
            .delete_archive(archive)
            .await
            .map_err(|e| as_collaborator_error("DELETE_ARCHIVE", e))?;
        info!(archive = %archive.display(), "Archive metadata removed");
        Ok(())
    }

    fn adapter_for(&self, archive: &Path) -> Result<ArchiveAdapter> {
        create_for_with(archive, &self.compression)
    }

    /**
     * Recomputes the checksum after a committed mutation and refreshes metadata
     *
     * The mutation can no longer be undone here, so these reads ignore the
     * caller's cancellation token.
     */
    async fn record_mutation<F>(
        &self,
        archive: &Path,
        adapter: &ArchiveAdapter,
        operation: OperationType,
        describe: F,
    ) -> Result<String>
    where
        F: FnOnce(&str) -> String,
    {
        let settled = CancellationToken::new();
        let checksum = match checksum_of(adapter, archive, &settled).await {
            Ok(checksum) => checksum,
            Err(e) => return Err(self.audit_failure(archive, operation, e).await),
        };
        info!(archive = %archive.display(), %operation, %checksum, "Archive updated");

        let Some(repository) = &self.repository else {
            debug!(archive = %archive.display(), "No repository configured, skipping metadata update");
            return Ok(checksum);
        };

        let entries = match adapter
            .get_entries(archive, &ProgressSink::none(), &settled)
            .await
        {
            Ok(entries) => entries,
            Err(e) => return Err(self.audit_failure(archive, operation, e).await),
        };

        repository
            .update_checksum(archive, &checksum)
            .await
            .map_err(|e| as_collaborator_error(operation.as_str(), e))?;
        repository
            .sync_entries(archive, &entries)
            .await
            .map_err(|e| as_collaborator_error(operation.as_str(), e))?;
        repository
            .log_operation(
                archive,
                operation,
                OperationResult::Success,
                Some(&describe(&checksum)),
            )
            .await
            .map_err(|e| as_collaborator_error(operation.as_str(), e))?;

        debug!(archive = %archive.display(), entries = entries.len(), "Metadata refreshed");
        Ok(checksum)
    }

    async fn log_success(
        &self,
        archive: &Path,
        operation: OperationType,
        result: OperationResult,
        metadata: &str,
    ) -> Result<()> {
        let Some(repository) = &self.repository else {
            return Ok(());
        };

        repository
            .log_operation(archive, operation, result, Some(metadata))
            .await
            .map_err(|e| as_collaborator_error(operation.as_str(), e))
    }

    /**
     * Records a failed or cancelled operation and hands the error back
     *
     * Only errors raised after work started are recorded. An audit failure
     * here is logged and the original error wins.
     */
    async fn audit_failure(
        &self,
        archive: &Path,
        operation: OperationType,
        error: AppError,
    ) -> AppError {
        let result = match &error {
            AppError::Cancelled => OperationResult::Cancelled,
            AppError::Io(_) | AppError::CorruptOrUnreadable { .. } => OperationResult::Failed,
            _ => return error,
        };

        warn!(archive = %archive.display(), %operation, %result, error = %error, "Archive operation did not complete");

        if let Some(repository) = &self.repository {
            if let Err(audit_err) = repository
                .log_operation(archive, operation, result, Some(&error.to_string()))
                .await
            {
                warn!(
                    archive = %archive.display(),
                    %operation,
                    error = %audit_err,
                    "Failed to record operation outcome"
                );
            }
        }

        error
    }
}

impl Default for ArchiveManager {
    fn default() -> Self {
        Self::standalone()
    }
}

async fn ensure_exists(archive: &Path) -> Result<()> {
    match tokio::fs::metadata(archive).await {
        Ok(metadata) if metadata.is_file() => Ok(()),
        _ => Err(AppError::ArchiveNotFound(archive.to_path_buf())),
    }
}

async fn checksum_of(
    adapter: &ArchiveAdapter,
    archive: &Path,
    cancel: &CancellationToken,
) -> Result<String> {
    let visitor = adapter
        .accept_visitor(archive, ChecksumVisitor::new(), &ProgressSink::none(), cancel)
        .await?;
    Ok(visitor.finish())
}

fn as_collaborator_error(operation: &str, error: AppError) -> AppError {
    match error {
        AppError::Collaborator { message, .. } => AppError::collaborator(operation, message),
        other => AppError::collaborator(operation, other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingRepository {
        checksums: Mutex<Vec<String>>,
        entry_counts: Mutex<Vec<usize>>,
        operations: Mutex<Vec<(OperationType, OperationResult, Option<String>)>>,
        deleted: Mutex<Vec<PathBuf>>,
    }

    #[async_trait]
    impl ArchiveRepository for RecordingRepository {
        async fn update_checksum(&self, _archive: &Path, checksum: &str) -> Result<()> {
            self.checksums.lock().unwrap().push(checksum.to_string());
            Ok(())
        }

        async fn sync_entries(&self, _archive: &Path, entries: &[ArchiveEntry]) -> Result<()> {
            self.entry_counts.lock().unwrap().push(entries.len());
            Ok(())
        }

        async fn log_operation(
            &self,
            _archive: &Path,
            operation: OperationType,
            result: OperationResult,
            metadata: Option<&str>,
        ) -> Result<()> {
            self.operations
                .lock()
                .unwrap()
                .push((operation, result, metadata.map(str::to_string)));
            Ok(())
        }

        async fn delete_archive(&self, archive: &Path) -> Result<()> {
            self.deleted.lock().unwrap().push(archive.to_path_buf());
            Ok(())
        }
    }

    fn write_inputs(dir: &Path) -> Vec<PathBuf> {
        let a = dir.join("a.txt");
        let b = dir.join("b.txt");
        fs::write(&a, "hi").unwrap();
        fs::write(&b, "bye").unwrap();
        vec![a, b]
    }

    #[tokio::test]
    async fn test_standalone_create_returns_checksum() {
        let temp_dir = TempDir::new().unwrap();
        let inputs = write_inputs(temp_dir.path());
        let archive = temp_dir.path().join("out.zip");
        let manager = ArchiveManager::standalone();
        let cancel = CancellationToken::new();

        let checksum = manager
            .create_archive(&archive, &inputs, &ProgressSink::none(), &cancel)
            .await
            .unwrap();

        assert_eq!(checksum.len(), 64);
        assert_eq!(
            manager.calculate_checksum(&archive, &cancel).await.unwrap(),
            checksum
        );
        assert!(!manager.has_repository());
    }

    #[tokio::test]
    async fn test_mutations_refresh_repository() {
        let temp_dir = TempDir::new().unwrap();
        let inputs = write_inputs(temp_dir.path());
        let archive = temp_dir.path().join("out.tar");
        let repository = Arc::new(RecordingRepository::default());
        let manager = ArchiveManager::new(Some(repository.clone()));
        let cancel = CancellationToken::new();

        let created = manager
            .create_archive(&archive, &inputs, &ProgressSink::none(), &cancel)
            .await
            .unwrap();
        let after_delete = manager
            .delete_files(&archive, &["a.txt".to_string()], &ProgressSink::none(), &cancel)
            .await
            .unwrap();

        assert_ne!(created, after_delete);
        assert_eq!(*repository.checksums.lock().unwrap(), vec![created.clone(), after_delete]);
        assert_eq!(*repository.entry_counts.lock().unwrap(), vec![2, 1]);

        let operations = repository.operations.lock().unwrap();
        assert_eq!(operations[0].0, OperationType::Create);
        assert_eq!(operations[0].2.as_deref(), Some(format!("Checksum: {}", created).as_str()));
        assert_eq!(operations[1].0, OperationType::DeleteFiles);
        assert!(operations[1]
            .2
            .as_deref()
            .unwrap()
            .starts_with("Deleted 1 files. New checksum: "));
    }

    #[tokio::test]
    async fn test_missing_archive_fails_before_audit() {
        let temp_dir = TempDir::new().unwrap();
        let repository = Arc::new(RecordingRepository::default());
        let manager = ArchiveManager::new(Some(repository.clone()));
        let missing = temp_dir.path().join("missing.zip");

        let err = manager
            .test_archive(&missing, &ProgressSink::none(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::ArchiveNotFound(_)));
        assert!(repository.operations.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_add_is_audited() {
        let temp_dir = TempDir::new().unwrap();
        let inputs = write_inputs(temp_dir.path());
        let archive = temp_dir.path().join("out.zip");
        let repository = Arc::new(RecordingRepository::default());
        let manager = ArchiveManager::new(Some(repository.clone()));

        manager
            .create_archive(&archive, &inputs[..1], &ProgressSink::none(), &CancellationToken::new())
            .await
            .unwrap();
        let before = fs::read(&archive).unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = manager
            .add_files(&archive, &inputs, &ProgressSink::none(), &cancel)
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(fs::read(&archive).unwrap(), before);
        let operations = repository.operations.lock().unwrap();
        let last = operations.last().unwrap();
        assert_eq!((last.0, last.1), (OperationType::AddFiles, OperationResult::Cancelled));
    }

    #[tokio::test]
    async fn test_integrity_result_is_audited() {
        let temp_dir = TempDir::new().unwrap();
        let inputs = write_inputs(temp_dir.path());
        let archive = temp_dir.path().join("out.tar.gz");
        let repository = Arc::new(RecordingRepository::default());
        let manager = ArchiveManager::new(Some(repository.clone()));
        let cancel = CancellationToken::new();

        manager
            .create_archive(&archive, &inputs, &ProgressSink::none(), &cancel)
            .await
            .unwrap();
        let result = manager
            .test_archive(&archive, &ProgressSink::none(), &cancel)
            .await
            .unwrap();

        assert!(result.is_valid);
        assert_eq!(result.entries_checked, 2);
        let operations = repository.operations.lock().unwrap();
        let last = operations.last().unwrap();
        assert_eq!(last.0, OperationType::Test);
        assert_eq!(last.1, OperationResult::Success);
        assert_eq!(last.2.as_deref(), Some("Checked 2 entries. Valid: true"));
    }

    #[tokio::test]
    async fn test_split_uses_configured_default_size() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("blob.zip");
        fs::write(&source, vec![7u8; 2 * 1024 * 1024 + 5]).unwrap();

        let mut config = ArchiverConfig::default();
        config.volumes.default_volume_size_mb = 1;
        let manager = ArchiveManager::from_config(&config, None);
        let cancel = CancellationToken::new();

        let parts = manager
            .split_archive(&source, None, &ProgressSink::none(), &cancel)
            .await
            .unwrap();
        assert_eq!(parts.len(), 3);

        let info = manager.volume_info(&parts[0]).await.unwrap();
        assert_eq!(info.part_count, 3);
        assert_eq!(info.total_size, 2 * 1024 * 1024 + 5);
    }

    #[tokio::test]
    async fn test_forget_archive_without_repository_is_noop() {
        let manager = ArchiveManager::default();
        assert!(manager.forget_archive(Path::new("any.zip")).await.is_ok());

        let repository = Arc::new(RecordingRepository::default());
        let manager = ArchiveManager::new(Some(repository.clone()));
        manager.forget_archive(Path::new("any.zip")).await.unwrap();
        assert_eq!(*repository.deleted.lock().unwrap(), vec![PathBuf::from("any.zip")]);
    }

    #[test]
    fn test_collaborator_error_keeps_message() {
        let err = as_collaborator_error("CREATE", AppError::collaborator("database", "locked"));
        match err {
            AppError::Collaborator { operation, message } => {
                assert_eq!(operation, "CREATE");
                assert_eq!(message, "locked");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
