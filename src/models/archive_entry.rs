use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One file or directory record inside an archive.
///
/// Produced fresh by every enumeration. `full_name` is archive-relative and
/// always uses `/` as separator; directory entries carry no content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveEntry {
    pub full_name: String,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub last_modified: DateTime<Utc>,
    pub is_directory: bool,
}

impl ArchiveEntry {
    pub fn file(full_name: impl Into<String>, size: u64, last_modified: DateTime<Utc>) -> Self {
        Self {
            full_name: full_name.into(),
            compressed_size: size,
            uncompressed_size: size,
            last_modified,
            is_directory: false,
        }
    }

    pub fn directory(full_name: impl Into<String>, last_modified: DateTime<Utc>) -> Self {
        Self {
            full_name: full_name.into(),
            compressed_size: 0,
            uncompressed_size: 0,
            last_modified,
            is_directory: true,
        }
    }
}

impl fmt::Display for ArchiveEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_directory {
            write!(f, "{} (DIR)", self.full_name)
        } else {
            write!(f, "{} ({} bytes)", self.full_name, self.uncompressed_size)
        }
    }
}
