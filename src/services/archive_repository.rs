use crate::error::Result;
use crate::models::ArchiveEntry;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/**
 * Persistence and audit collaborator for the archive manager
 *
 * Archives are keyed by the path string the caller used. Implementations
 * create the archive record on first touch.
 */
#[async_trait]
pub trait ArchiveRepository: Send + Sync {
    async fn update_checksum(&self, archive: &Path, checksum: &str) -> Result<()>;

    /// Replaces every recorded entry of `archive` with `entries`
    async fn sync_entries(&self, archive: &Path, entries: &[ArchiveEntry]) -> Result<()>;

    async fn log_operation(
        &self,
        archive: &Path,
        operation: OperationType,
        result: OperationResult,
        metadata: Option<&str>,
    ) -> Result<()>;

    /// Purges the archive record and its entries
    async fn delete_archive(&self, archive: &Path) -> Result<()>;
}

/// Audit tag of a facade operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationType {
    Create,
    AddFiles,
    DeleteFiles,
    Extract,
    Test,
    Split,
    Merge,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Create => "CREATE",
            OperationType::AddFiles => "ADD_FILES",
            OperationType::DeleteFiles => "DELETE_FILES",
            OperationType::Extract => "EXTRACT",
            OperationType::Test => "TEST",
            OperationType::Split => "SPLIT",
            OperationType::Merge => "MERGE",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationResult {
    Success,
    Failed,
    Cancelled,
}

impl OperationResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationResult::Success => "Success",
            OperationResult::Failed => "Failed",
            OperationResult::Cancelled => "Cancelled",
        }
    }
}

impl fmt::Display for OperationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stored archive row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveRecord {
    pub id: i64,
    pub file_path: String,
    pub archive_type: String,
    pub checksum: Option<String>,
    pub created_at: i64,
    pub modified_at: i64,
}

/// Stored entry row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryRecord {
    pub file_name: String,
    pub file_size: i64,
    pub modified_date: i64,
    pub is_directory: bool,
}

/// Stored audit row; `archive_path` is `None` once the archive was forgotten
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub id: i64,
    pub archive_path: Option<String>,
    pub operation_type: String,
    pub timestamp: i64,
    pub result: String,
    pub metadata: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_tags() {
        let tags: Vec<&str> = [
            OperationType::Create,
            OperationType::AddFiles,
            OperationType::DeleteFiles,
            OperationType::Extract,
            OperationType::Test,
            OperationType::Split,
            OperationType::Merge,
        ]
        .iter()
        .map(OperationType::as_str)
        .collect();
        assert_eq!(
            tags,
            vec!["CREATE", "ADD_FILES", "DELETE_FILES", "EXTRACT", "TEST", "SPLIT", "MERGE"]
        );
    }

    #[test]
    fn test_operation_type_serializes_as_tag() {
        let json = serde_json::to_string(&OperationType::DeleteFiles).unwrap();
        assert_eq!(json, "\"DELETE_FILES\"");
        assert_eq!(OperationResult::Cancelled.to_string(), "Cancelled");
    }
}
