pub mod archive_entry;
pub mod test_result;
pub mod volume_info;

pub use archive_entry::ArchiveEntry;
pub use test_result::TestResult;
pub use volume_info::VolumeInfo;
