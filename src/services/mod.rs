//! Facade, volume splitting and the metadata repository

pub mod archive_manager;
pub mod archive_repository;
pub mod metadata_db;
pub mod volume_splitter;

pub use archive_manager::ArchiveManager;
pub use archive_repository::{
    ArchiveRecord, ArchiveRepository, EntryRecord, OperationRecord, OperationResult,
    OperationType,
};
pub use metadata_db::SqliteArchiveRepository;
pub use volume_splitter::VolumeSplitter;
