//! Per-entry traversal callbacks that fold an archive into one result

pub mod checksum_visitor;
pub mod integrity_visitor;

pub use checksum_visitor::ChecksumVisitor;
pub use integrity_visitor::IntegrityVisitor;
