//! Archiver core
//!
//! Create, update, inspect and extract ZIP, TAR and TAR.GZ archives, split
//! files into numbered volumes and merge them back, with an optional SQLite
//! record of checksums, entries and operations.

pub mod archive;
pub mod error;
pub mod infrastructure;
pub mod models;
pub mod services;
pub mod visitors;

pub use archive::{ArchiveAdapter, ArchiveFormat, ArchiveHandler, EntryVisitor, ProgressSink};
pub use error::{AppError, Result};
pub use models::{ArchiveEntry, TestResult, VolumeInfo};
pub use services::{ArchiveManager, ArchiveRepository, SqliteArchiveRepository, VolumeSplitter};
pub use tokio_util::sync::CancellationToken;
